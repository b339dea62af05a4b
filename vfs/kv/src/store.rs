//! Synchronous key-value store contracts.

use std::collections::HashMap;

use bfs_core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

pub trait SyncRoTransaction {
    /// Returns the value stored under `key`, if any.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
}

pub trait SyncRwTransaction: SyncRoTransaction {
    /// Stores `data` under `key`. Returns `false` without writing when the
    /// key exists and `overwrite` is not set.
    fn put(&mut self, key: &str, data: &[u8], overwrite: bool) -> Result<bool>;

    fn del(&mut self, key: &str) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    /// Undoes every change made through this transaction.
    fn abort(&mut self) -> Result<()>;
}

pub enum SyncTransaction<'a> {
    ReadOnly(Box<dyn SyncRoTransaction + 'a>),
    ReadWrite(Box<dyn SyncRwTransaction + 'a>),
}

pub trait SyncKeyValueStore: Send + Sync + 'static {
    fn name(&self) -> String;

    fn clear(&self) -> Result<()>;

    fn begin_read_only(&self) -> Box<dyn SyncRoTransaction + '_>;

    fn begin_read_write(&self) -> Box<dyn SyncRwTransaction + '_>;

    fn begin_transaction(&self, mode: TransactionMode) -> SyncTransaction<'_> {
        match mode {
            TransactionMode::ReadOnly => SyncTransaction::ReadOnly(self.begin_read_only()),
            TransactionMode::ReadWrite => SyncTransaction::ReadWrite(self.begin_read_write()),
        }
    }
}

/// A store with no transaction support of its own. Wrapped by
/// [`SimpleSyncRwTransaction`] to gain rollback.
pub trait SimpleSyncStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> bool;

    fn del(&self, key: &str);
}

pub struct SimpleSyncRoTransaction<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: SimpleSyncStore + ?Sized> SimpleSyncRoTransaction<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }
}

impl<S: SimpleSyncStore + ?Sized> SyncRoTransaction for SimpleSyncRoTransaction<'_, S> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(key))
    }
}

/// Read-write transaction over a [`SimpleSyncStore`].
///
/// Writes go straight to the store. The first value seen for each key is
/// stashed so `abort` can put it back, or delete keys that did not exist.
pub struct SimpleSyncRwTransaction<'a, S: ?Sized> {
    store: &'a S,
    original: HashMap<String, Option<Vec<u8>>>,
    modified: Vec<String>,
}

impl<'a, S: SimpleSyncStore + ?Sized> SimpleSyncRwTransaction<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            original: HashMap::new(),
            modified: Vec::new(),
        }
    }

    fn stash(&mut self, key: &str, value: Option<&Vec<u8>>) {
        if !self.original.contains_key(key) {
            self.original.insert(key.to_owned(), value.cloned());
        }
    }

    fn mark_modified(&mut self, key: &str) {
        if !self.modified.iter().any(|k| k == key) {
            self.modified.push(key.to_owned());
            if !self.original.contains_key(key) {
                let value = self.store.get(key);
                self.original.insert(key.to_owned(), value);
            }
        }
    }
}

impl<S: SimpleSyncStore + ?Sized> SyncRoTransaction for SimpleSyncRwTransaction<'_, S> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.store.get(key);
        self.stash(key, value.as_ref());
        Ok(value)
    }
}

impl<S: SimpleSyncStore + ?Sized> SyncRwTransaction for SimpleSyncRwTransaction<'_, S> {
    fn put(&mut self, key: &str, data: &[u8], overwrite: bool) -> Result<bool> {
        self.mark_modified(key);
        Ok(self.store.put(key, data, overwrite))
    }

    fn del(&mut self, key: &str) -> Result<()> {
        self.mark_modified(key);
        self.store.del(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.original.clear();
        self.modified.clear();
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        for key in self.modified.drain(..) {
            match self.original.get(&key) {
                Some(Some(value)) => {
                    self.store.put(&key, value, true);
                }
                _ => self.store.del(&key),
            }
        }
        self.original.clear();
        Ok(())
    }
}
