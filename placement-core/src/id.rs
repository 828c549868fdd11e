//! Id allocation
//!
//! Peer ids come from an external allocator. The in-memory allocator is
//! used by the binary's standalone mode and by tests.

use crate::error::{PlacementError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source. Ids are never reused.
pub trait IdAllocator: Send + Sync {
    /// Allocate a fresh id
    fn alloc_id(&self) -> Result<u64>;
}

/// Process-local allocator
#[derive(Debug)]
pub struct MemoryIdAllocator {
    next: AtomicU64,
    /// Inclusive upper bound; allocation fails once it is passed
    limit: AtomicU64,
}

impl MemoryIdAllocator {
    /// Allocator starting at `start`
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            limit: AtomicU64::new(u64::MAX),
        }
    }

    /// Allocator that is exhausted after `limit`
    pub fn with_limit(start: u64, limit: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            limit: AtomicU64::new(limit),
        }
    }

    /// Extend the id range, as when a new batch has been reserved. Ids
    /// refused while exhausted are skipped, not handed out later.
    pub fn raise_limit(&self, limit: u64) {
        self.limit.fetch_max(limit, Ordering::SeqCst);
    }
}

impl Default for MemoryIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdAllocator for MemoryIdAllocator {
    fn alloc_id(&self) -> Result<u64> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let limit = self.limit.load(Ordering::SeqCst);
        if id > limit {
            return Err(PlacementError::IdAllocation(format!(
                "id space exhausted at {limit}"
            )));
        }
        Ok(id)
    }
}
