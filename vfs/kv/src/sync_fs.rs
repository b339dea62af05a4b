//! File system engine over a [`SyncKeyValueStore`].

use std::fmt;
use std::sync::Arc;

use bfs_core::{
    ApiError, ErrorCode, File, FileFlag, FileSystem, FileType, Inode, PERMISSION_MASK, PreloadFile, Result,
    Stats, SyncBacking, now_ms, path,
};

use crate::node::{
    DirListing, EMPTY_LISTING, MAX_ID_ATTEMPTS, ROOT_NODE_ID, decode_listing, encode_listing,
    moves_into_itself, new_root_inode, out_of_ids, random_id,
};
use crate::store::{SyncKeyValueStore, SyncRoTransaction, SyncRwTransaction};

pub type SyncKeyValueFile<S> = PreloadFile<SyncKeyValueFileSystem<S>>;

/// Stores every file as two records: an [`Inode`] under a random key and
/// the file's data under the inode's id. Directories store their listing
/// as data.
///
/// Every call runs in its own transaction, committed on success and
/// aborted on failure.
pub struct SyncKeyValueFileSystem<S> {
    store: Arc<S>,
}

impl<S> Clone for SyncKeyValueFileSystem<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: SyncKeyValueStore> fmt::Debug for SyncKeyValueFileSystem<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncKeyValueFileSystem")
            .field("store", &self.store.name())
            .finish()
    }
}

fn commit_or_abort<T>(mut tx: Box<dyn SyncRwTransaction + '_>, res: Result<T>) -> Result<T> {
    match res {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = tx.abort() {
                tracing::warn!(error = %abort_err, "transaction abort failed");
            }
            Err(e)
        }
    }
}

impl<S: SyncKeyValueStore> SyncKeyValueFileSystem<S> {
    /// Wraps `store`, creating the root directory if the store has none.
    pub fn new(store: S) -> Result<Self> {
        let fs = Self {
            store: Arc::new(store),
        };
        fs.make_root_directory()?;
        tracing::debug!(store = %fs.store.name(), "key-value file system ready");
        Ok(fs)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Deletes everything, leaving an empty root.
    pub fn empty(&self) -> Result<()> {
        self.store.clear()?;
        self.make_root_directory()
    }

    fn make_root_directory(&self) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = (|| -> Result<()> {
            if tx.get(ROOT_NODE_ID)?.is_some() {
                return Ok(());
            }
            let root = new_root_inode();
            tx.put(&root.id, EMPTY_LISTING, false)?;
            tx.put(ROOT_NODE_ID, &root.to_buffer(), false)?;
            Ok(())
        })();
        commit_or_abort(tx, res)
    }

    fn get_inode<T: SyncRoTransaction + ?Sized>(
        &self,
        tx: &mut T,
        path: &str,
        id: &str,
    ) -> Result<Inode> {
        match tx.get(id)? {
            Some(data) => Inode::from_buffer(&data),
            None => Err(ApiError::enoent(path)),
        }
    }

    fn get_dir_listing<T: SyncRoTransaction + ?Sized>(
        &self,
        tx: &mut T,
        path: &str,
        inode: &Inode,
    ) -> Result<DirListing> {
        if !inode.is_directory() {
            return Err(ApiError::enotdir(path));
        }
        match tx.get(&inode.id)? {
            Some(data) => decode_listing(path, &data),
            None => Err(ApiError::enoent(path)),
        }
    }

    /// Key of the inode record for `p`.
    fn find_inode_id<T: SyncRoTransaction + ?Sized>(&self, tx: &mut T, p: &str) -> Result<String> {
        let mut id = ROOT_NODE_ID.to_owned();
        let mut current = String::from("/");
        for name in path::segments(p) {
            let dir = self.get_inode(tx, &current, &id)?;
            let listing = self.get_dir_listing(tx, &current, &dir)?;
            let child = path::join(&current, name);
            id = match listing.get(name) {
                Some(child_id) => child_id.clone(),
                None => return Err(ApiError::enoent(&child)),
            };
            current = child;
        }
        Ok(id)
    }

    fn find_inode<T: SyncRoTransaction + ?Sized>(&self, tx: &mut T, p: &str) -> Result<Inode> {
        let id = self.find_inode_id(tx, p)?;
        self.get_inode(tx, p, &id)
    }

    fn add_new_node<T: SyncRwTransaction + ?Sized>(&self, tx: &mut T, data: &[u8]) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = random_id();
            match tx.put(&id, data, false) {
                Ok(true) => return Ok(id),
                Ok(false) => tracing::trace!(%id, "random key already taken"),
                Err(e) => tracing::trace!(%id, error = %e, "random key rejected"),
            }
        }
        Err(out_of_ids())
    }

    fn commit_new_file<T: SyncRwTransaction + ?Sized>(
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
        let parent_inode = self.find_inode(tx, parent)?;
        let mut listing = self.get_dir_listing(tx, parent, &parent_inode)?;
        if listing.contains_key(name) {
            return Err(ApiError::eexist(p));
        }
        let size = u32::try_from(data.len()).map_err(|_| ApiError::file_error(ErrorCode::Fbig, p))?;
        let data_id = self.add_new_node(tx, data)?;
        let now = now_ms();
        let inode = Inode::new(
            data_id,
            size,
            (mode & PERMISSION_MASK) | file_type.bits(),
            now,
            now,
            now,
        );
        let inode_id = self.add_new_node(tx, &inode.to_buffer())?;
        listing.insert(name.to_owned(), inode_id);
        tx.put(&parent_inode.id, &encode_listing(&listing)?, true)?;
        Ok(inode)
    }

    fn remove_entry(&self, p: &str, is_dir: bool) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = self.remove_entry_in(tx.as_mut(), p, is_dir);
        commit_or_abort(tx, res)
    }

    fn remove_entry_in<T: SyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        p: &str,
        is_dir: bool,
    ) -> Result<()> {
        let (parent, name) = path::split(p);
        let parent_inode = self.find_inode(tx, parent)?;
        let mut listing = self.get_dir_listing(tx, parent, &parent_inode)?;
        let Some(inode_id) = listing.shift_remove(name) else {
            return Err(ApiError::enoent(p));
        };
        let inode = self.get_inode(tx, p, &inode_id)?;
        if !is_dir && inode.is_directory() {
            return Err(ApiError::eisdir(p));
        }
        if is_dir && !inode.is_directory() {
            return Err(ApiError::enotdir(p));
        }
        tx.put(&parent_inode.id, &encode_listing(&listing)?, true)?;
        tx.del(&inode.id)?;
        tx.del(&inode_id)?;
        Ok(())
    }

    fn rename_in<T: SyncRwTransaction + ?Sized>(
        &self,
        tx: &mut T,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let (old_parent, old_name) = path::split(old_path);
        let (new_parent, new_name) = path::split(new_path);

        let old_dir = self.find_inode(tx, old_parent)?;
        let mut old_listing = self.get_dir_listing(tx, old_parent, &old_dir)?;
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
            let dir = self.find_inode(tx, new_parent)?;
            let listing = self.get_dir_listing(tx, new_parent, &dir)?;
            (dir, listing)
        };

        if let Some(existing_id) = new_listing.get(new_name).cloned() {
            let existing = self.get_inode(tx, new_path, &existing_id)?;
            if !existing.is_file() {
                return Err(ApiError::eperm(new_path));
            }
            tx.del(&existing.id)?;
            tx.del(&existing_id)?;
        }
        new_listing.insert(new_name.to_owned(), node_id);

        if same_parent {
            tx.put(&new_dir.id, &encode_listing(&new_listing)?, true)?;
        } else {
            tx.put(&old_dir.id, &encode_listing(&old_listing)?, true)?;
            tx.put(&new_dir.id, &encode_listing(&new_listing)?, true)?;
        }
        Ok(())
    }

    fn update_inode(&self, p: &str, update: impl FnOnce(&mut Inode)) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = (|| -> Result<()> {
            let id = self.find_inode_id(tx.as_mut(), p)?;
            let mut inode = self.get_inode(tx.as_mut(), p, &id)?;
            update(&mut inode);
            tx.put(&id, &inode.to_buffer(), true)?;
            Ok(())
        })();
        commit_or_abort(tx, res)
    }

    /// Persists a handle's buffer and, when its stats moved, its inode.
    pub fn sync_file(&self, p: &str, data: &[u8], stats: &Stats) -> Result<()> {
        if u32::try_from(data.len()).is_err() {
            return Err(ApiError::file_error(ErrorCode::Fbig, p));
        }
        let mut tx = self.store.begin_read_write();
        let res = (|| -> Result<()> {
            let id = self.find_inode_id(tx.as_mut(), p)?;
            let mut inode = self.get_inode(tx.as_mut(), p, &id)?;
            let changed = inode.update(stats)?;
            tx.put(&inode.id, data, true)?;
            if changed {
                tx.put(&id, &inode.to_buffer(), true)?;
            }
            Ok(())
        })();
        commit_or_abort(tx, res)
    }
}

impl<S: SyncKeyValueStore> SyncBacking for SyncKeyValueFileSystem<S> {
    fn supports_props(&self) -> bool {
        true
    }

    fn sync_file(&self, path: &str, data: &[u8], stats: &Stats) -> Result<()> {
        SyncKeyValueFileSystem::sync_file(self, path, data, stats)
    }
}

impl<S: SyncKeyValueStore> FileSystem for SyncKeyValueFileSystem<S> {
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
        true
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        tracing::trace!(old_path, new_path, "rename");
        let mut tx = self.store.begin_read_write();
        let res = self.rename_in(tx.as_mut(), old_path, new_path);
        commit_or_abort(tx, res)
    }

    fn stat(&self, path: &str, _is_lstat: bool) -> Result<Stats> {
        let mut tx = self.store.begin_read_only();
        Ok(self.find_inode(tx.as_mut(), path)?.to_stats())
    }

    fn open_file(&self, path: &str, flag: FileFlag) -> Result<Box<dyn File>> {
        let mut tx = self.store.begin_read_only();
        let inode = self.find_inode(tx.as_mut(), path)?;
        let Some(data) = tx.get(&inode.id)? else {
            return Err(ApiError::enoent(path));
        };
        let file = PreloadFile::new(self.clone(), path, flag, inode.to_stats(), data)?;
        Ok(Box::new(file))
    }

    fn create_file(&self, path: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn File>> {
        tracing::trace!(path, "create file");
        let mut tx = self.store.begin_read_write();
        let res = self.commit_new_file(tx.as_mut(), path, FileType::File, mode, &[]);
        let inode = commit_or_abort(tx, res)?;
        let file = PreloadFile::new(self.clone(), path, flag, inode.to_stats(), Vec::new())?;
        Ok(Box::new(file))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        self.remove_entry(path, false)
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        if !self.readdir(path)?.is_empty() {
            return Err(ApiError::enotempty(path));
        }
        self.remove_entry(path, true)
    }

    fn mkdir(&self, path: &str, mode: u16) -> Result<()> {
        let mut tx = self.store.begin_read_write();
        let res = self.commit_new_file(tx.as_mut(), path, FileType::Directory, mode, EMPTY_LISTING);
        commit_or_abort(tx, res).map(|_| ())
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let mut tx = self.store.begin_read_only();
        let inode = self.find_inode(tx.as_mut(), path)?;
        let listing = self.get_dir_listing(tx.as_mut(), path, &inode)?;
        Ok(listing.into_keys().collect())
    }

    fn chmod(&self, path: &str, _is_lchmod: bool, mode: u16) -> Result<()> {
        self.update_inode(path, |inode| {
            inode.mode = (inode.mode & !PERMISSION_MASK) | (mode & PERMISSION_MASK);
            inode.ctime = now_ms();
        })
    }

    fn utimes(&self, path: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.update_inode(path, |inode| {
            inode.atime = atime_ms;
            inode.mtime = mtime_ms;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use bfs_core::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
    use pretty_assertions::assert_eq;

    fn fs() -> SyncKeyValueFileSystem<InMemoryStore> {
        SyncKeyValueFileSystem::new(InMemoryStore::new()).unwrap()
    }

    #[test]
    fn root_bootstrap_is_idempotent() {
        let store = InMemoryStore::new();
        let first = SyncKeyValueFileSystem::new(store.clone()).unwrap();
        first.mkdir("/kept", DEFAULT_DIR_MODE).unwrap();
        let records = store.len();

        let second = SyncKeyValueFileSystem::new(store.clone()).unwrap();
        assert_eq!(store.len(), records);
        assert_eq!(second.readdir("/").unwrap(), vec!["kept"]);
    }

    #[test]
    fn root_stats() {
        let stats = fs().stat("/", false).unwrap();
        assert!(stats.is_directory());
        assert_eq!(stats.size, 4096);
        assert_eq!(stats.permissions(), DEFAULT_DIR_MODE);
    }

    #[test]
    fn mkdir_twice_fails() {
        let fs = fs();
        fs.mkdir("/d", DEFAULT_DIR_MODE).unwrap();
        assert_eq!(
            fs.mkdir("/d", DEFAULT_DIR_MODE).unwrap_err().errno(),
            ErrorCode::Exist
        );
        assert_eq!(
            fs.mkdir("/", DEFAULT_DIR_MODE).unwrap_err().errno(),
            ErrorCode::Exist
        );
    }

    #[test]
    fn lookups_through_files_fail_enotdir() {
        let fs = fs();
        fs.write_file("/f", b"x", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        assert_eq!(
            fs.stat("/f/g", false).unwrap_err().errno(),
            ErrorCode::Notdir
        );
        assert_eq!(fs.readdir("/f").unwrap_err().errno(), ErrorCode::Notdir);
    }

    #[test]
    fn unlink_and_rmdir_check_types() {
        let fs = fs();
        fs.mkdir("/d", DEFAULT_DIR_MODE).unwrap();
        fs.write_file("/f", b"x", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        assert_eq!(fs.unlink("/d").unwrap_err().errno(), ErrorCode::Isdir);
        assert_eq!(fs.rmdir("/f").unwrap_err().errno(), ErrorCode::Notdir);
        assert_eq!(fs.unlink("/none").unwrap_err().errno(), ErrorCode::Noent);
    }

    #[test]
    fn unlink_reclaims_records() {
        let store = InMemoryStore::new();
        let fs = SyncKeyValueFileSystem::new(store.clone()).unwrap();
        let baseline = store.len();
        fs.write_file("/f", b"data", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        assert_eq!(store.len(), baseline + 2);
        fs.unlink("/f").unwrap();
        assert_eq!(store.len(), baseline);
    }

    #[test]
    fn rename_moves_between_directories() {
        let fs = fs();
        fs.mkdir("/a", DEFAULT_DIR_MODE).unwrap();
        fs.mkdir("/b", DEFAULT_DIR_MODE).unwrap();
        fs.write_file("/a/f", b"payload", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        fs.rename("/a/f", "/b/g").unwrap();
        assert!(fs.readdir("/a").unwrap().is_empty());
        assert_eq!(fs.readdir("/b").unwrap(), vec!["g"]);
        assert_eq!(fs.read_file("/b/g", FileFlag::Read).unwrap(), b"payload");
    }

    #[test]
    fn rename_replaces_files_but_not_directories() {
        let fs = fs();
        fs.write_file("/src", b"new", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        fs.write_file("/dst", b"old", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        fs.rename("/src", "/dst").unwrap();
        assert_eq!(fs.readdir("/").unwrap(), vec!["dst"]);
        assert_eq!(fs.read_file("/dst", FileFlag::Read).unwrap(), b"new");

        fs.mkdir("/dir", DEFAULT_DIR_MODE).unwrap();
        assert_eq!(
            fs.rename("/dst", "/dir").unwrap_err().errno(),
            ErrorCode::Perm
        );
        // The failed rename left the source in place.
        assert!(fs.exists("/dst"));
    }

    #[test]
    fn rename_into_own_subtree_is_busy() {
        let fs = fs();
        fs.mkdir("/a", DEFAULT_DIR_MODE).unwrap();
        fs.mkdir("/a/b", DEFAULT_DIR_MODE).unwrap();
        assert_eq!(
            fs.rename("/a", "/a/b/c").unwrap_err().errno(),
            ErrorCode::Busy
        );
        assert_eq!(
            fs.rename("/missing", "/x").unwrap_err().errno(),
            ErrorCode::Noent
        );
        assert!(fs.exists("/a/b"));
    }

    #[test]
    fn chmod_and_utimes_update_inode() {
        let fs = fs();
        fs.write_file("/f", b"x", FileFlag::Write, DEFAULT_FILE_MODE)
            .unwrap();
        fs.chmod("/f", false, 0o600).unwrap();
        fs.utimes("/f", 1000.0, 2000.0).unwrap();
        let stats = fs.stat("/f", false).unwrap();
        assert!(stats.is_file());
        assert_eq!(stats.permissions(), 0o600);
        assert_eq!(stats.atime_ms, 1000.0);
        assert_eq!(stats.mtime_ms, 2000.0);
        assert_eq!(
            fs.chown("/f", false, 1, 1).unwrap_err().errno(),
            ErrorCode::Notsup
        );
    }

    #[test]
    fn empty_resets_to_root() {
        let fs = fs();
        fs.mkdir("/d", DEFAULT_DIR_MODE).unwrap();
        fs.empty().unwrap();
        assert!(fs.readdir("/").unwrap().is_empty());
        assert!(fs.stat("/", false).unwrap().is_directory());
    }
}
