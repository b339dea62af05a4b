use std::collections::HashMap;
use std::sync::Arc;

use bfs_core::Result;
use parking_lot::RwLock;

use crate::store::{
    SimpleSyncRoTransaction, SimpleSyncRwTransaction, SimpleSyncStore, SyncKeyValueStore,
    SyncRoTransaction, SyncRwTransaction,
};
use crate::sync_fs::SyncKeyValueFileSystem;

/// Hash map store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    map: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl SimpleSyncStore for InMemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> bool {
        let mut map = self.map.write();
        if !overwrite && map.contains_key(key) {
            return false;
        }
        map.insert(key.to_owned(), data.to_vec());
        true
    }

    fn del(&self, key: &str) {
        self.map.write().remove(key);
    }
}

impl SyncKeyValueStore for InMemoryStore {
    fn name(&self) -> String {
        "In-memory".to_owned()
    }

    fn clear(&self) -> Result<()> {
        self.map.write().clear();
        Ok(())
    }

    fn begin_read_only(&self) -> Box<dyn SyncRoTransaction + '_> {
        Box::new(SimpleSyncRoTransaction::new(self))
    }

    fn begin_read_write(&self) -> Box<dyn SyncRwTransaction + '_> {
        Box::new(SimpleSyncRwTransaction::new(self))
    }
}

pub type InMemoryFileSystem = SyncKeyValueFileSystem<InMemoryStore>;

impl InMemoryFileSystem {
    /// Creates an empty in-memory file system containing only `/`.
    pub fn in_memory() -> Result<Self> {
        SyncKeyValueFileSystem::new(InMemoryStore::new())
    }
}
