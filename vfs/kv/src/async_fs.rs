//! File system engine over an [`AsyncKeyValueStore`].
//!
//! Same record layout as the synchronous engine, plus an optional LRU
//! cache of path to inode-key lookups.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bfs_core::{
    ApiError, AsyncBacking, ErrorCode, FileAsync, FileFlag, FileSystemAsync, FileType, Inode,
    PERMISSION_MASK, PreloadFile, Result, Stats, now_ms, path,
};
use parking_lot::Mutex;

use crate::async_store::{AsyncKeyValueStore, AsyncRoTransaction, AsyncRwTransaction};
use crate::config::AsyncKvConfig;
use crate::lru::LruCache;
use crate::node::{
    DirListing, EMPTY_LISTING, MAX_ID_ATTEMPTS, ROOT_NODE_ID, decode_listing, encode_listing,
    moves_into_itself, new_root_inode, out_of_ids, random_id,
};

pub type AsyncKeyValueFile<S> = PreloadFile<AsyncKeyValueFileSystem<S>>;

pub struct AsyncKeyValueFileSystem<S> {
    store: Arc<S>,
    cache: Arc<Mutex<Option<LruCache>>>,
}

impl<S> Clone for AsyncKeyValueFileSystem<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: AsyncKeyValueStore> fmt::Debug for AsyncKeyValueFileSystem<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncKeyValueFileSystem")
            .field("store", &self.store.name())
            .field("cached", &self.cache.lock().is_some())
            .finish()
    }
}

async fn commit_or_abort<T>(mut tx: Box<dyn AsyncRwTransaction + '_>, res: Result<T>) -> Result<T> {
    match res {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = tx.abort().await {
                tracing::warn!(error = %abort_err, "transaction abort failed");
            }
            Err(e)
        }
    }
}

impl<S: AsyncKeyValueStore> AsyncKeyValueFileSystem<S> {
    /// Wraps `store`, creating the root directory if the store has none.
    pub async fn new(store: S, config: AsyncKvConfig) -> Result<Self> {
        config.validate()?;
        let cache = (config.cache_size > 0).then(|| LruCache::new(config.cache_size));
        let fs = Self {
            store: Arc::new(store),
            cache: Arc::new(Mutex::new(cache)),
        };
        fs.make_root_directory().await?;
        tracing::debug!(
            store = %fs.store.name(),
            cache_size = config.cache_size,
            "async key-value file system ready"
        );
        Ok(fs)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Deletes everything, leaving an empty root.
    pub async fn empty(&self) -> Result<()> {
        self.clear_cache();
        self.store.clear().await?;
        self.make_root_directory().await
    }

    fn clear_cache(&self) {
        if let Some(cache) = self.cache.lock().as_mut() {
            cache.clear();
        }
    }

    fn cached(&self, p: &str) -> Option<String> {
        self.cache.lock().as_mut().and_then(|cache| cache.get(p))
    }

    fn remember(&self, p: &str, id: &str) {
        if let Some(cache) = self.cache.lock().as_mut() {
            cache.set(p, id.to_owned());
        }
    }

    fn forget(&self, p: &str) {
        if let Some(cache) = self.cache.lock().as_mut() {
            cache.remove(p);
        }
    }

    async fn make_root_directory(&self) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = async {
            if tx.get(ROOT_NODE_ID).await?.is_some() {
                return Ok(());
            }
            let root = new_root_inode();
            tx.put(&root.id, EMPTY_LISTING, false).await?;
            tx.put(ROOT_NODE_ID, &root.to_buffer(), false).await?;
            Ok::<_, ApiError>(())
        }
        .await;
        commit_or_abort(tx, res).await
    }

    async fn get_inode<T: AsyncRoTransaction + ?Sized>(
        &self,
        tx: &mut T,
        path: &str,
        id: &str,
    ) -> Result<Inode> {
        match tx.get(id).await? {
            Some(data) => Inode::from_buffer(&data),
            None => Err(ApiError::enoent(path)),
        }
    }

    async fn get_dir_listing<T: AsyncRoTransaction + ?Sized>(
        &self,
        tx: &mut T,
        path: &str,
        inode: &Inode,
    ) -> Result<DirListing> {
        if !inode.is_directory() {
            return Err(ApiError::enotdir(path));
        }
        match tx.get(&inode.id).await? {
            Some(data) => decode_listing(path, &data),
            None => Err(ApiError::enoent(path)),
        }
    }

    async fn find_inode_id<T: AsyncRoTransaction + ?Sized>(
        &self,
        tx: &mut T,
        p: &str,
    ) -> Result<String> {
        let mut id = ROOT_NODE_ID.to_owned();
        let mut current = String::from("/");
        for name in path::segments(p) {
            let child = path::join(&current, name);
            id = match self.cached(&child) {
                Some(hit) => hit,
                None => {
                    let dir = self.get_inode(tx, &current, &id).await?;
                    let listing = self.get_dir_listing(tx, &current, &dir).await?;
                    let Some(child_id) = listing.get(name).cloned() else {
                        return Err(ApiError::enoent(&child));
                    };
                    self.remember(&child, &child_id);
                    child_id
                }
            };
            current = child;
        }
        Ok(id)
    }

    async fn find_inode<T: AsyncRoTransaction + ?Sized>(&self, tx: &mut T, p: &str) -> Result<Inode> {
        let id = self.find_inode_id(tx, p).await?;
        self.get_inode(tx, p, &id).await
    }

    async fn add_new_node<T: AsyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        data: &[u8],
    ) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = random_id();
            match tx.put(&id, data, false).await {
                Ok(true) => return Ok(id),
                Ok(false) => tracing::trace!(%id, "random key already taken"),
                Err(e) => tracing::trace!(%id, error = %e, "random key rejected"),
            }
        }
        Err(out_of_ids())
    }

    async fn commit_new_file<T: AsyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        p: &str,
        file_type: FileType,
        mode: u16,
        data: &[u8],
    ) -> Result<Inode> {
        if p == "/" {
            return Err(ApiError::eexist(p));
        }
        let (parent, name) = path::split(p);
        let parent_inode = self.find_inode(tx, parent).await?;
        let mut listing = self.get_dir_listing(tx, parent, &parent_inode).await?;
        if listing.contains_key(name) {
            return Err(ApiError::eexist(p));
        }
        let size =
            u32::try_from(data.len()).map_err(|_| ApiError::file_error(ErrorCode::Fbig, p))?;
        let data_id = self.add_new_node(tx, data).await?;
        let now = now_ms();
        let inode = Inode::new(
            data_id,
            size,
            (mode & PERMISSION_MASK) | file_type.bits(),
            now,
            now,
            now,
        );
        let inode_id = self.add_new_node(tx, &inode.to_buffer()).await?;
        listing.insert(name.to_owned(), inode_id);
        tx.put(&parent_inode.id, &encode_listing(&listing)?, true)
            .await?;
        Ok(inode)
    }

    async fn remove_entry(&self, p: &str, is_dir: bool) -> Result<()> {
        self.forget(p);
        let mut tx = self.store.begin_read_write();
        let res = self.remove_entry_in(tx.as_mut(), p, is_dir).await;
        commit_or_abort(tx, res).await
    }

    async fn remove_entry_in<T: AsyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        p: &str,
        is_dir: bool,
    ) -> Result<()> {
        let (parent, name) = path::split(p);
        let parent_inode = self.find_inode(tx, parent).await?;
        let mut listing = self.get_dir_listing(tx, parent, &parent_inode).await?;
        let Some(inode_id) = listing.shift_remove(name) else {
            return Err(ApiError::enoent(p));
        };
        let inode = self.get_inode(tx, p, &inode_id).await?;
        if !is_dir && inode.is_directory() {
            return Err(ApiError::eisdir(p));
        }
        if is_dir && !inode.is_directory() {
            return Err(ApiError::enotdir(p));
        }
        tx.put(&parent_inode.id, &encode_listing(&listing)?, true)
            .await?;
        tx.del(&inode.id).await?;
        tx.del(&inode_id).await?;
        Ok(())
    }

    async fn rename_in<T: AsyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let (old_parent, old_name) = path::split(old_path);
        let (new_parent, new_name) = path::split(new_path);

        let old_dir = self.find_inode(tx, old_parent).await?;
        let mut old_listing = self.get_dir_listing(tx, old_parent, &old_dir).await?;
        let Some(node_id) = old_listing.shift_remove(old_name) else {
            return Err(ApiError::enoent(old_path));
        };
        if moves_into_itself(old_path, new_parent) {
            return Err(ApiError::ebusy(old_parent));
        }

        let same_parent = new_parent == old_parent;
        let (new_dir, mut new_listing) = if same_parent {
            (old_dir.clone(), old_listing.clone())
        } else {
            let dir = self.find_inode(tx, new_parent).await?;
            let listing = self.get_dir_listing(tx, new_parent, &dir).await?;
            (dir, listing)
        };

        if let Some(existing_id) = new_listing.get(new_name).cloned() {
            let existing = self.get_inode(tx, new_path, &existing_id).await?;
            if !existing.is_file() {
                return Err(ApiError::eperm(new_path));
            }
            tx.del(&existing.id).await?;
            tx.del(&existing_id).await?;
        }
        new_listing.insert(new_name.to_owned(), node_id);

        if !same_parent {
            tx.put(&old_dir.id, &encode_listing(&old_listing)?, true)
                .await?;
        }
        tx.put(&new_dir.id, &encode_listing(&new_listing)?, true)
            .await?;
        Ok(())
    }

    async fn update_inode(&self, p: &str, update: impl FnOnce(&mut Inode) + Send) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = async {
            let id = self.find_inode_id(tx.as_mut(), p).await?;
            let mut inode = self.get_inode(tx.as_mut(), p, &id).await?;
            update(&mut inode);
            tx.put(&id, &inode.to_buffer(), true).await?;
            Ok::<_, ApiError>(())
        }
        .await;
        commit_or_abort(tx, res).await
    }

    /// Persists a handle's buffer and, when its stats moved, its inode.
    pub async fn sync_file(&self, p: &str, data: &[u8], stats: &Stats) -> Result<()> {
        if u32::try_from(data.len()).is_err() {
            return Err(ApiError::file_error(ErrorCode::Fbig, p));
        }
        let mut tx = self.store.begin_read_write();
        let res = async {
            let id = self.find_inode_id(tx.as_mut(), p).await?;
            let mut inode = self.get_inode(tx.as_mut(), p, &id).await?;
            let changed = inode.update(stats)?;
            tx.put(&inode.id, data, true).await?;
            if changed {
                tx.put(&id, &inode.to_buffer(), true).await?;
            }
            Ok::<_, ApiError>(())
        }
        .await;
        commit_or_abort(tx, res).await
    }
}

#[async_trait]
impl<S: AsyncKeyValueStore> AsyncBacking for AsyncKeyValueFileSystem<S> {
    fn supports_props(&self) -> bool {
        true
    }

    async fn sync_file(&self, path: &str, data: &[u8], stats: &Stats) -> Result<()> {
        AsyncKeyValueFileSystem::sync_file(self, path, data, stats).await
    }
}

#[async_trait]
impl<S: AsyncKeyValueStore> FileSystemAsync for AsyncKeyValueFileSystem<S> {
    fn name(&self) -> String {
        self.store.name()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        true
    }

    fn supports_synch(&self) -> bool {
        false
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        tracing::trace!(old_path, new_path, "rename");
        self.clear_cache();
        let mut tx = self.store.begin_read_write();
        let res = self.rename_in(tx.as_mut(), old_path, new_path).await;
        let res = commit_or_abort(tx, res).await;
        self.clear_cache();
        res
    }

    async fn stat(&self, path: &str, _is_lstat: bool) -> Result<Stats> {
        let mut tx = self.store.begin_read_only();
        Ok(self.find_inode(tx.as_mut(), path).await?.to_stats())
    }

    async fn open_file(&self, path: &str, flag: FileFlag) -> Result<Box<dyn FileAsync>> {
        let mut tx = self.store.begin_read_only();
        let inode = self.find_inode(tx.as_mut(), path).await?;
        let Some(data) = tx.get(&inode.id).await? else {
            return Err(ApiError::enoent(path));
        };
        let file = PreloadFile::new(self.clone(), path, flag, inode.to_stats(), data)?;
        Ok(Box::new(file))
    }

    async fn create_file(
        &self,
        path: &str,
        flag: FileFlag,
        mode: u16,
    ) -> Result<Box<dyn FileAsync>> {
        tracing::trace!(path, "create file");
        let mut tx = self.store.begin_read_write();
        let res = self
            .commit_new_file(tx.as_mut(), path, FileType::File, mode, &[])
            .await;
        let inode = commit_or_abort(tx, res).await?;
        let file = PreloadFile::new(self.clone(), path, flag, inode.to_stats(), Vec::new())?;
        Ok(Box::new(file))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.remove_entry(path, false).await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        if !self.readdir(path).await?.is_empty() {
            return Err(ApiError::enotempty(path));
        }
        self.remove_entry(path, true).await
    }

    async fn mkdir(&self, path: &str, mode: u16) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = self
            .commit_new_file(tx.as_mut(), path, FileType::Directory, mode, EMPTY_LISTING)
            .await;
        commit_or_abort(tx, res).await.map(|_| ())
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut tx = self.store.begin_read_only();
        let inode = self.find_inode(tx.as_mut(), path).await?;
        let listing = self.get_dir_listing(tx.as_mut(), path, &inode).await?;
        Ok(listing.into_keys().collect())
    }

    async fn chmod(&self, path: &str, _is_lchmod: bool, mode: u16) -> Result<()> {
        self.update_inode(path, |inode| {
            inode.mode = (inode.mode & !PERMISSION_MASK) | (mode & PERMISSION_MASK);
            inode.ctime = now_ms();
        })
        .await
    }

    async fn utimes(&self, path: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.update_inode(path, |inode| {
            inode.atime = atime_ms;
            inode.mtime = mtime_ms;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryAsyncStore;
    use bfs_core::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
    use pretty_assertions::assert_eq;

    async fn fs(cache_size: usize) -> AsyncKeyValueFileSystem<InMemoryAsyncStore> {
        let config = AsyncKvConfig::default().with_cache_size(cache_size);
        AsyncKeyValueFileSystem::new(InMemoryAsyncStore::new(), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reports_async_only() {
        let fs = fs(0).await;
        assert!(!fs.supports_synch());
        assert_eq!(FileSystemAsync::name(&fs), "In-memory");
    }

    #[tokio::test]
    async fn file_round_trip() {
        let fs = fs(10).await;
        fs.mkdir("/docs", DEFAULT_DIR_MODE).await.unwrap();
        fs.write_file("/docs/a", b"alpha", FileFlag::Write, DEFAULT_FILE_MODE)
            .await
            .unwrap();
        assert_eq!(
            fs.read_file("/docs/a", FileFlag::Read).await.unwrap(),
            b"alpha"
        );
        assert_eq!(fs.stat("/docs/a", false).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn cache_does_not_outlive_unlink() {
        let fs = fs(10).await;
        fs.write_file("/f", b"1", FileFlag::Write, DEFAULT_FILE_MODE)
            .await
            .unwrap();
        assert!(fs.exists("/f").await);
        assert!(fs.cached("/f").is_some());
        fs.unlink("/f").await.unwrap();
        assert!(fs.cached("/f").is_none());
        assert!(!fs.exists("/f").await);
    }

    #[tokio::test]
    async fn rename_drops_cached_paths() {
        let fs = fs(10).await;
        fs.mkdir("/a", DEFAULT_DIR_MODE).await.unwrap();
        fs.write_file("/a/f", b"x", FileFlag::Write, DEFAULT_FILE_MODE)
            .await
            .unwrap();
        assert!(fs.exists("/a/f").await);
        fs.rename("/a", "/b").await.unwrap();
        assert!(!fs.exists("/a/f").await);
        assert_eq!(fs.read_file("/b/f", FileFlag::Read).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn rmdir_requires_empty_directory() {
        let fs = fs(0).await;
        fs.mkdir("/d", DEFAULT_DIR_MODE).await.unwrap();
        fs.write_file("/d/f", b"", FileFlag::Write, DEFAULT_FILE_MODE)
            .await
            .unwrap();
        assert_eq!(
            fs.rmdir("/d").await.unwrap_err().errno(),
            ErrorCode::Notempty
        );
        fs.unlink("/d/f").await.unwrap();
        fs.rmdir("/d").await.unwrap();
        assert!(fs.readdir("/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_untouched() {
        let fs = fs(0).await;
        let before = fs.store().inner().len();
        let err = fs
            .mkdir("/missing/child", DEFAULT_DIR_MODE)
            .await
            .unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Noent);
        assert_eq!(fs.store().inner().len(), before);
    }
}
