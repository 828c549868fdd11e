//! Error types for the placement scheduler
//!
//! Only request-level rejections are surfaced to callers. Persistence and
//! allocation failures are logged by the component that hit them.

use thiserror::Error;

/// Result type alias for placement operations
pub type Result<T> = std::result::Result<T, PlacementError>;

/// Unified error type for the placement scheduler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    // ===== Heartbeat Rejections =====
    #[error("Region {region_id} is stale: reported epoch {reported}, cached epoch {cached}")]
    RegionStale {
        region_id: u64,
        reported: String,
        cached: String,
    },

    #[error("Store not found: {0}")]
    StoreNotFound(u64),

    #[error("Store {0} is tombstone")]
    StoreTombstone(u64),

    #[error("Region not found: {0}")]
    RegionNotFound(u64),

    #[error("Invalid region {region_id}: {reason}")]
    InvalidRegion { region_id: u64, reason: String },

    #[error("Invalid state change for store {store_id}: {reason}")]
    InvalidStoreState { store_id: u64, reason: String },

    // ===== Collaborator Errors =====
    #[error("Id allocation failed: {0}")]
    IdAllocation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ===== Scheduling Errors =====
    #[error("Operator already exists for region {0}")]
    OperatorExists(u64),

    #[error("Operator rejected for region {region_id}: {reason}")]
    OperatorRejected { region_id: u64, reason: String },

    #[error("Scheduler already exists: {0}")]
    SchedulerExists(String),

    #[error("Scheduler not found: {0}")]
    SchedulerNotFound(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlacementError {
    /// Whether the error is a stale-epoch rejection
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::RegionStale { .. })
    }
}
