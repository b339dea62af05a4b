//! Asynchronous key-value store contracts.

use async_trait::async_trait;
use bfs_core::Result;

use crate::memory::InMemoryStore;
use crate::store::{SimpleSyncStore, SyncKeyValueStore, TransactionMode};

#[async_trait]
pub trait AsyncRoTransaction: Send {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait AsyncRwTransaction: AsyncRoTransaction {
    async fn put(&mut self, key: &str, data: &[u8], overwrite: bool) -> Result<bool>;

    async fn del(&mut self, key: &str) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn abort(&mut self) -> Result<()>;
}

pub enum AsyncTransaction<'a> {
    ReadOnly(Box<dyn AsyncRoTransaction + 'a>),
    ReadWrite(Box<dyn AsyncRwTransaction + 'a>),
}

#[async_trait]
pub trait AsyncKeyValueStore: Send + Sync + 'static {
    fn name(&self) -> String;

    async fn clear(&self) -> Result<()>;

    fn begin_read_only(&self) -> Box<dyn AsyncRoTransaction + '_>;

    fn begin_read_write(&self) -> Box<dyn AsyncRwTransaction + '_>;

    fn begin_transaction(&self, mode: TransactionMode) -> AsyncTransaction<'_> {
        match mode {
            TransactionMode::ReadOnly => AsyncTransaction::ReadOnly(self.begin_read_only()),
            TransactionMode::ReadWrite => AsyncTransaction::ReadWrite(self.begin_read_write()),
        }
    }
}

/// [`InMemoryStore`] data behind the asynchronous contract.
///
/// Writes are staged in the transaction and applied on commit, the way
/// IndexedDB-style stores behave.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAsyncStore {
    inner: InMemoryStore,
}

impl InMemoryAsyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares the records of an existing synchronous store.
    pub fn from_store(inner: InMemoryStore) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

struct MemoryRoTransaction<'a> {
    store: &'a InMemoryStore,
}

#[async_trait]
impl AsyncRoTransaction for MemoryRoTransaction<'_> {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key))
    }
}

enum Staged {
    Put(Vec<u8>),
    Del,
}

struct MemoryRwTransaction<'a> {
    store: &'a InMemoryStore,
    staged: Vec<(String, Staged)>,
}

impl MemoryRwTransaction<'_> {
    fn staged(&self, key: &str) -> Option<&Staged> {
        self.staged
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, op)| op)
    }

    fn current(&self, key: &str) -> Option<Vec<u8>> {
        match self.staged(key) {
            Some(Staged::Put(data)) => Some(data.clone()),
            Some(Staged::Del) => None,
            None => self.store.get(key),
        }
    }
}

#[async_trait]
impl AsyncRoTransaction for MemoryRwTransaction<'_> {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.current(key))
    }
}

#[async_trait]
impl AsyncRwTransaction for MemoryRwTransaction<'_> {
    async fn put(&mut self, key: &str, data: &[u8], overwrite: bool) -> Result<bool> {
        if !overwrite && self.current(key).is_some() {
            return Ok(false);
        }
        self.staged.push((key.to_owned(), Staged::Put(data.to_vec())));
        Ok(true)
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        self.staged.push((key.to_owned(), Staged::Del));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        for (key, op) in self.staged.drain(..) {
            match op {
                Staged::Put(data) => {
                    self.store.put(&key, &data, true);
                }
                Staged::Del => self.store.del(&key),
            }
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.staged.clear();
        Ok(())
    }
}

#[async_trait]
impl AsyncKeyValueStore for InMemoryAsyncStore {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn clear(&self) -> Result<()> {
        SyncKeyValueStore::clear(&self.inner)
    }

    fn begin_read_only(&self) -> Box<dyn AsyncRoTransaction + '_> {
        Box::new(MemoryRoTransaction { store: &self.inner })
    }

    fn begin_read_write(&self) -> Box<dyn AsyncRwTransaction + '_> {
        Box::new(MemoryRwTransaction {
            store: &self.inner,
            staged: Vec::new(),
        })
    }
}
