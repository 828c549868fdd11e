//! Placement Core Library
//!
//! Shared building blocks for the placement scheduler:
//! - Unified error type
//! - Clock abstraction (system and manual clocks)
//! - Id allocation interface
//! - TTL id caches for skip lists and split markers

pub mod clock;
pub mod error;
pub mod id;
pub mod ttl;

pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use error::{PlacementError, Result};
pub use id::{IdAllocator, MemoryIdAllocator};
pub use ttl::TtlCache;

/// A store silent for longer than this is considered disconnected
pub const STORE_DISCONNECT_DURATION: std::time::Duration = std::time::Duration::from_secs(20);
