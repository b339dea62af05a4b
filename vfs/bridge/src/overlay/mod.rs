//! A writable layer over a read-only one.
//!
//! Reads fall through to the readable layer until a path is modified; the
//! first write copies the file, and any missing parent directories, up to
//! the writable layer. Deleting something that only the readable layer
//! holds is recorded in a log kept on the writable layer at
//! [`DELETION_LOG_PATH`], so deletions survive a remount.

mod deletion_log;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use bfs_core::{
    ActionType, ApiError, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DiskSpace, ErrorCode, File,
    FileFlag, FileSystem, PreloadFile, Result, Stats, SyncBacking, path,
};

pub use deletion_log::DELETION_LOG_PATH;
use deletion_log::DeletionLog;

use crate::config::OverlayFsConfig;

/// Write bits granted to everything read from the readable layer.
const WRITABLE_BITS: u16 = 0o222;

#[derive(Debug)]
struct Layers {
    writable: Arc<dyn FileSystem>,
    readable: Arc<dyn FileSystem>,
    log: Mutex<DeletionLog>,
}

impl Layers {
    fn check_path(&self, p: &str) -> Result<()> {
        if p == DELETION_LOG_PATH {
            return Err(ApiError::eperm(p));
        }
        Ok(())
    }

    fn hidden(&self, p: &str) -> bool {
        self.log.lock().hides(p)
    }

    fn exists(&self, p: &str) -> bool {
        self.writable.exists(p) || (!self.hidden(p) && self.readable.exists(p))
    }

    fn stat(&self, p: &str, is_lstat: bool) -> Result<Stats> {
        match self.writable.stat(p, is_lstat) {
            Err(e) if e.errno() == ErrorCode::Noent => {}
            other => return other,
        }
        if self.hidden(p) {
            return Err(ApiError::enoent(p));
        }
        let mut stats = self.readable.stat(p, is_lstat)?;
        stats.chmod(stats.permissions() | WRITABLE_BITS);
        Ok(stats)
    }

    /// Replaces the whole log on the writable layer.
    fn persist_log(&self, text: &str) -> Result<()> {
        self.writable.write_file(
            DELETION_LOG_PATH,
            text.as_bytes(),
            FileFlag::Write,
            DEFAULT_FILE_MODE,
        )
    }

    fn delete_path(&self, p: &str) -> Result<()> {
        let mut log = self.log.lock();
        log.delete(p);
        tracing::debug!(path = p, "recorded deletion from the readable layer");
        self.persist_log(log.text())
    }

    /// Creates the ancestors of `p` that the writable layer lacks, with the
    /// modes the overlay reports for them.
    fn create_parent_directories(&self, p: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut parent = path::dirname(p);
        while parent != "/" && !self.writable.exists(parent) {
            missing.push(parent);
            parent = path::dirname(parent);
        }
        for dir in missing.into_iter().rev() {
            let mode = self.stat(dir, false)?.permissions();
            self.writable.mkdir(dir, mode)?;
        }
        Ok(())
    }

    /// Copies `p` up from the readable layer unless the writable layer
    /// already holds it.
    fn operate_on_writable(&self, p: &str) -> Result<()> {
        if !self.exists(p) {
            return Err(ApiError::enoent(p));
        }
        if self.writable.exists(p) {
            return Ok(());
        }
        let stats = self.stat(p, false)?;
        self.create_parent_directories(p)?;
        if stats.is_directory() {
            self.writable.mkdir(p, stats.permissions())
        } else {
            let data = self.readable.read_file(p, FileFlag::Read)?;
            tracing::trace!(path = p, size = data.len(), "copying file up");
            self.writable
                .write_file(p, &data, FileFlag::Write, stats.permissions())
        }
    }

    fn readdir(&self, p: &str) -> Result<Vec<String>> {
        if !self.stat(p, false)?.is_directory() {
            return Err(ApiError::enotdir(p));
        }
        let upper = match self.writable.readdir(p) {
            Ok(names) => names,
            Err(e) if e.errno() == ErrorCode::Noent => Vec::new(),
            Err(e) => return Err(e),
        };
        let lower = self.readable.readdir(p).unwrap_or_default();
        let log = self.log.lock();
        let mut seen = HashSet::new();
        Ok(upper
            .into_iter()
            .filter(|name| path::join(p, name) != DELETION_LOG_PATH)
            .chain(
                lower
                    .into_iter()
                    .filter(|name| !log.hides(&path::join(p, name))),
            )
            .filter(|name| seen.insert(name.clone()))
            .collect())
    }
}

/// Writes an [`OverlayFile`] to the writable layer.
pub struct OverlayBacking {
    layers: Arc<Layers>,
}

impl SyncBacking for OverlayBacking {
    fn supports_props(&self) -> bool {
        self.layers.writable.supports_props() && self.layers.readable.supports_props()
    }

    fn sync_file(&self, p: &str, data: &[u8], stats: &Stats) -> Result<()> {
        self.layers.create_parent_directories(p)?;
        self.layers
            .writable
            .write_file(p, data, FileFlag::Write, stats.permissions())
    }
}

/// A readable-layer file opened through the overlay. It reaches the
/// writable layer only once it is modified and synced.
pub type OverlayFile = PreloadFile<OverlayBacking>;

#[derive(Debug)]
pub struct OverlayFs {
    layers: Arc<Layers>,
    lock: ReentrantMutex<()>,
}

impl OverlayFs {
    pub const NAME: &'static str = "OverlayFS";

    /// Validates `config` and loads the deletion log from the writable
    /// layer. A missing log means nothing has been deleted yet.
    pub fn new(config: OverlayFsConfig) -> Result<Self> {
        config.validate()?;
        let OverlayFsConfig { writable, readable } = config;
        let log = match writable.read_file(DELETION_LOG_PATH, FileFlag::Read) {
            Ok(raw) => DeletionLog::parse(String::from_utf8_lossy(&raw)),
            Err(e) if e.errno() == ErrorCode::Noent => DeletionLog::default(),
            Err(e) => return Err(e),
        };
        tracing::debug!(
            writable = %writable.name(),
            readable = %readable.name(),
            "initialized overlay"
        );
        Ok(Self {
            layers: Arc::new(Layers {
                writable,
                readable,
                log: Mutex::new(log),
            }),
            lock: ReentrantMutex::new(()),
        })
    }

    pub fn writable(&self) -> &Arc<dyn FileSystem> {
        &self.layers.writable
    }

    pub fn readable(&self) -> &Arc<dyn FileSystem> {
        &self.layers.readable
    }

    /// The deletion log in its stored text form.
    pub fn deletion_log(&self) -> String {
        self.layers.log.lock().text().to_owned()
    }

    /// Replaces the deletion log and writes it to the writable layer.
    pub fn restore_deletion_log(&self, text: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut log = self.layers.log.lock();
        log.replace(text);
        self.layers.persist_log(log.text())
    }

    fn rename_dir(&self, old_path: &str, new_path: &str, mode: u16) -> Result<()> {
        let layers = &self.layers;
        if !layers.exists(new_path) && !layers.readable.exists(old_path) {
            layers.create_parent_directories(new_path)?;
            return layers.writable.rename(old_path, new_path);
        }
        if !layers.writable.exists(new_path) {
            layers.create_parent_directories(new_path)?;
            layers.writable.mkdir(new_path, mode)?;
        }
        for name in layers.readdir(old_path)? {
            self.rename(&path::join(old_path, &name), &path::join(new_path, &name))?;
        }
        self.rmdir(old_path)
    }
}

impl FileSystem for OverlayFs {
    fn name(&self) -> String {
        Self::NAME.to_owned()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        self.layers.writable.supports_props() && self.layers.readable.supports_props()
    }

    fn disk_space(&self, p: &str) -> DiskSpace {
        self.layers.writable.disk_space(p)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let layers = &self.layers;
        if old_path == DELETION_LOG_PATH || new_path == DELETION_LOG_PATH {
            return Err(ApiError::with_message(
                ErrorCode::Perm,
                "Cannot rename deletion log.",
            ));
        }
        let old_stats = layers.stat(old_path, false)?;
        if old_path == new_path {
            return Ok(());
        }
        if old_stats.is_directory() {
            if format!("{}/", path::dirname(new_path)).starts_with(&format!("{old_path}/")) {
                return Err(ApiError::ebusy(path::dirname(old_path)));
            }
            let mut mode = DEFAULT_DIR_MODE;
            if layers.exists(new_path) {
                let new_stats = layers.stat(new_path, false)?;
                if !new_stats.is_directory() {
                    return Err(ApiError::enotdir(new_path));
                }
                if !layers.readdir(new_path)?.is_empty() {
                    return Err(ApiError::enotempty(new_path));
                }
                mode = new_stats.permissions();
            }
            return self.rename_dir(old_path, new_path, mode);
        }
        if layers.exists(new_path) && layers.stat(new_path, false)?.is_directory() {
            return Err(ApiError::eisdir(new_path));
        }
        let data = self.read_file(old_path, FileFlag::Read)?;
        self.write_file(new_path, &data, FileFlag::Write, old_stats.permissions())?;
        self.unlink(old_path)
    }

    fn stat(&self, p: &str, is_lstat: bool) -> Result<Stats> {
        let _guard = self.lock.lock();
        self.layers.stat(p, is_lstat)
    }

    fn open(&self, p: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn File>> {
        let _guard = self.lock.lock();
        let layers = &self.layers;
        layers.check_path(p)?;
        if !layers.exists(p) {
            return match flag.path_not_exists_action() {
                ActionType::CreateFile => {
                    layers.create_parent_directories(p)?;
                    layers.writable.open(p, flag, mode)
                }
                _ => Err(ApiError::enoent(p)),
            };
        }
        match flag.path_exists_action() {
            ActionType::TruncateFile => {
                layers.create_parent_directories(p)?;
                layers.writable.open(p, flag, mode)
            }
            ActionType::Nop if layers.writable.exists(p) => layers.writable.open(p, flag, mode),
            ActionType::Nop => {
                let stats = layers.stat(p, false)?;
                if stats.is_directory() {
                    return Err(ApiError::eisdir(p));
                }
                let data = layers.readable.read_file(p, FileFlag::Read)?;
                let backing = OverlayBacking {
                    layers: layers.clone(),
                };
                Ok(Box::new(OverlayFile::new(backing, p, flag, stats, data)?))
            }
            _ => Err(ApiError::eexist(p)),
        }
    }

    fn unlink(&self, p: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let layers = &self.layers;
        layers.check_path(p)?;
        if layers.stat(p, false)?.is_directory() {
            return Err(ApiError::eisdir(p));
        }
        if layers.writable.exists(p) {
            layers.writable.unlink(p)?;
        }
        if layers.exists(p) {
            layers.delete_path(p)?;
        }
        Ok(())
    }

    fn rmdir(&self, p: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let layers = &self.layers;
        if !layers.exists(p) {
            return Err(ApiError::enoent(p));
        }
        if !layers.readdir(p)?.is_empty() {
            return Err(ApiError::enotempty(p));
        }
        if layers.writable.exists(p) {
            layers.writable.rmdir(p)?;
        }
        if layers.exists(p) {
            layers.delete_path(p)?;
        }
        Ok(())
    }

    fn mkdir(&self, p: &str, mode: u16) -> Result<()> {
        let _guard = self.lock.lock();
        let layers = &self.layers;
        if layers.exists(p) {
            return Err(ApiError::eexist(p));
        }
        layers.create_parent_directories(p)?;
        layers.writable.mkdir(p, mode)
    }

    fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock();
        self.layers.readdir(p)
    }

    fn exists(&self, p: &str) -> bool {
        let _guard = self.lock.lock();
        self.layers.exists(p)
    }

    fn chmod(&self, p: &str, is_lchmod: bool, mode: u16) -> Result<()> {
        let _guard = self.lock.lock();
        self.layers.operate_on_writable(p)?;
        self.layers.writable.chmod(p, is_lchmod, mode)
    }

    fn chown(&self, p: &str, is_lchown: bool, uid: u32, gid: u32) -> Result<()> {
        let _guard = self.lock.lock();
        self.layers.operate_on_writable(p)?;
        self.layers.writable.chown(p, is_lchown, uid, gid)
    }

    fn utimes(&self, p: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        let _guard = self.lock.lock();
        self.layers.operate_on_writable(p)?;
        self.layers.writable.utimes(p, atime_ms, mtime_ms)
    }
}
