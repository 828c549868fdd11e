//! Persistence interface for cluster metadata
//!
//! The topology cache writes through this interface on a best-effort
//! basis: failures are logged and never block a heartbeat.

use crate::models::{RegionMeta, StoreMeta};
use parking_lot::RwLock;
use placement_core::Result;
use std::collections::BTreeMap;

/// Durable store/region metadata
#[cfg_attr(test, mockall::automock)]
pub trait MetaStorage: Send + Sync {
    fn save_store(&self, store: &StoreMeta) -> Result<()>;

    fn save_region(&self, region: &RegionMeta) -> Result<()>;

    fn delete_region(&self, region: &RegionMeta) -> Result<()>;

    fn load_stores(&self) -> Result<Vec<StoreMeta>>;

    fn load_regions(&self) -> Result<Vec<RegionMeta>>;
}

/// In-process storage, used by tests and by the standalone binary
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: RwLock<BTreeMap<u64, StoreMeta>>,
    regions: RwLock<BTreeMap<u64, RegionMeta>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region_count(&self) -> usize {
        self.regions.read().len()
    }

    pub fn store_count(&self) -> usize {
        self.stores.read().len()
    }

    pub fn region(&self, id: u64) -> Option<RegionMeta> {
        self.regions.read().get(&id).cloned()
    }
}

impl MetaStorage for MemoryStorage {
    fn save_store(&self, store: &StoreMeta) -> Result<()> {
        self.stores.write().insert(store.id, store.clone());
        Ok(())
    }

    fn save_region(&self, region: &RegionMeta) -> Result<()> {
        self.regions.write().insert(region.id, region.clone());
        Ok(())
    }

    fn delete_region(&self, region: &RegionMeta) -> Result<()> {
        self.regions.write().remove(&region.id);
        Ok(())
    }

    fn load_stores(&self) -> Result<Vec<StoreMeta>> {
        Ok(self.stores.read().values().cloned().collect())
    }

    fn load_regions(&self) -> Result<Vec<RegionMeta>> {
        Ok(self.regions.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Peer, RegionEpoch};

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        let region = RegionMeta {
            id: 5,
            start_key: b"a".to_vec(),
            end_key: b"b".to_vec(),
            epoch: RegionEpoch::new(1, 1),
            peers: vec![Peer::new(51, 1)],
        };
        storage.save_region(&region).unwrap();
        storage
            .save_store(&StoreMeta {
                id: 1,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(storage.load_regions().unwrap(), vec![region.clone()]);
        assert_eq!(storage.store_count(), 1);

        storage.delete_region(&region).unwrap();
        assert_eq!(storage.region_count(), 0);
    }
}
