//! Key-value store contracts and the file system engines built on them.

mod async_fs;
mod async_store;
mod config;
mod lru;
mod memory;
mod node;
mod store;
mod sync_fs;

pub use async_fs::{AsyncKeyValueFile, AsyncKeyValueFileSystem};
pub use async_store::{
    AsyncKeyValueStore, AsyncRoTransaction, AsyncRwTransaction, AsyncTransaction,
    InMemoryAsyncStore,
};
pub use config::{AsyncKvConfig, MAX_CACHE_SIZE};
pub use memory::{InMemoryFileSystem, InMemoryStore};
pub use store::{
    SimpleSyncRoTransaction, SimpleSyncRwTransaction, SimpleSyncStore, SyncKeyValueStore,
    SyncRoTransaction, SyncRwTransaction, SyncTransaction, TransactionMode,
};
pub use sync_fs::{SyncKeyValueFile, SyncKeyValueFileSystem};
