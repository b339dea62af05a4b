//! Node-style file API over a single active backend.
//!
//! The facade normalizes arguments, owns the descriptor table and
//! dispatches every call to the backend given to [`Facade::initialize`].
//! Both a synchronous and an asynchronous surface are exposed; the
//! asynchronous one works against any backend, the synchronous one only
//! against a [`Backend::Sync`].

mod asynchronous;

pub use asynchronous::defer;

use std::sync::Arc;

use bfs_core::{
    ApiError, AsyncFsFromSync, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DiskSpace, ErrorCode, File,
    FileFlag, FileSystem, FileSystemAsync, Result, Stats,
};
use parking_lot::{Mutex, RwLock};

use crate::config::FacadeConfig;
use crate::fd::{Fd, FdTable, OpenFile};
use crate::normalize::{Mode, TimeArg, normalize_mode, normalize_path};
use crate::watch::{WatchEventKind, WatchListener, WatcherId, Watchers};

const NO_ROOT: &str = "Initialize the facade with a file system using initialize()";

/// The backend a [`Facade`] dispatches to.
#[derive(Debug, Clone)]
pub enum Backend {
    Sync(Arc<dyn FileSystem>),
    Async(Arc<dyn FileSystemAsync>),
}

impl Backend {
    pub fn name(&self) -> String {
        match self {
            Backend::Sync(fs) => fs.name(),
            Backend::Async(fs) => fs.name(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            Backend::Sync(fs) => fs.is_read_only(),
            Backend::Async(fs) => fs.is_read_only(),
        }
    }
}

impl From<Arc<dyn FileSystem>> for Backend {
    fn from(fs: Arc<dyn FileSystem>) -> Self {
        Backend::Sync(fs)
    }
}

impl From<Arc<dyn FileSystemAsync>> for Backend {
    fn from(fs: Arc<dyn FileSystemAsync>) -> Self {
        Backend::Async(fs)
    }
}

#[derive(Debug, Clone)]
struct Root {
    backend: Backend,
    /// The backend seen through the asynchronous trait.
    view: Arc<dyn FileSystemAsync>,
}

impl Root {
    fn new(backend: Backend) -> Self {
        let view: Arc<dyn FileSystemAsync> = match &backend {
            Backend::Sync(fs) => Arc::new(AsyncFsFromSync::new(fs.clone())),
            Backend::Async(fs) => fs.clone(),
        };
        Self { backend, view }
    }
}

#[derive(Debug)]
pub struct Facade {
    config: FacadeConfig,
    root: RwLock<Option<Root>>,
    fds: Mutex<FdTable>,
    watchers: Watchers,
}

impl Default for Facade {
    fn default() -> Self {
        Self::build(FacadeConfig::default())
    }
}

impl Facade {
    pub fn new(config: FacadeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: FacadeConfig) -> Self {
        let fds = Mutex::new(FdTable::new(config.first_fd));
        Self {
            config,
            root: RwLock::new(None),
            fds,
            watchers: Watchers::default(),
        }
    }

    /// Makes `backend` the target of every later call and returns the
    /// backend it replaces. Open descriptors keep their handles.
    pub fn initialize(&self, backend: impl Into<Backend>) -> Option<Backend> {
        let backend = backend.into();
        tracing::debug!(backend = %backend.name(), "initialized facade");
        self.root
            .write()
            .replace(Root::new(backend))
            .map(|old| old.backend)
    }

    pub fn root(&self) -> Option<Backend> {
        self.root.read().as_ref().map(|r| r.backend.clone())
    }

    pub fn cwd(&self) -> &str {
        &self.config.cwd
    }

    pub fn open_descriptors(&self) -> usize {
        self.fds.lock().len()
    }

    pub fn watch(&self, p: &str, listener: WatchListener) -> Result<WatcherId> {
        let p = self.normalize(p)?;
        Ok(self.watchers.watch(p, listener))
    }

    /// Removes a listener; false when `id` was not registered.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        self.watchers.unwatch(id)
    }

    fn normalize(&self, p: &str) -> Result<String> {
        normalize_path(&self.config.cwd, p)
    }

    fn resolve(&self, op: &'static str, p: &str) -> Result<String> {
        let resolved = self.normalize(p)?;
        tracing::trace!(op, path = %resolved, "dispatching");
        Ok(resolved)
    }

    fn sync_root(&self) -> Result<Arc<dyn FileSystem>> {
        match self.root.read().as_ref().map(|r| &r.backend) {
            Some(Backend::Sync(fs)) => Ok(fs.clone()),
            Some(Backend::Async(_)) => Err(ApiError::enotsup()),
            None => Err(ApiError::eio(NO_ROOT)),
        }
    }

    fn async_root(&self) -> Result<Arc<dyn FileSystemAsync>> {
        self.root
            .read()
            .as_ref()
            .map(|r| r.view.clone())
            .ok_or_else(|| ApiError::eio(NO_ROOT))
    }

    fn fd(&self, fd: Fd) -> Result<OpenFile> {
        self.fds.lock().get(fd)
    }

    fn trigger(&self, p: &str, kind: WatchEventKind, stats: Option<Stats>) {
        self.watchers.trigger(p, kind, stats);
    }

    pub fn disk_space(&self, p: &str) -> Result<DiskSpace> {
        let p = self.resolve("disk_space", p)?;
        Ok(self.sync_root()?.disk_space(&p))
    }

    pub fn stat(&self, p: &str) -> Result<Stats> {
        let p = self.resolve("stat", p)?;
        self.sync_root()?.stat(&p, false)
    }

    pub fn lstat(&self, p: &str) -> Result<Stats> {
        let p = self.resolve("lstat", p)?;
        self.sync_root()?.stat(&p, true)
    }

    pub fn exists(&self, p: &str) -> bool {
        let Ok(p) = self.resolve("exists", p) else {
            return false;
        };
        self.sync_root().is_ok_and(|fs| fs.exists(&p))
    }

    pub fn realpath(&self, p: &str) -> Result<String> {
        let p = self.resolve("realpath", p)?;
        self.sync_root()?.realpath(&p)
    }

    pub fn readdir(&self, p: &str) -> Result<Vec<String>> {
        let p = self.resolve("readdir", p)?;
        self.sync_root()?.readdir(&p)
    }

    pub fn mkdir(&self, p: &str, mode: Option<Mode>) -> Result<()> {
        let p = self.resolve("mkdir", p)?;
        let fs = self.sync_root()?;
        fs.mkdir(&p, normalize_mode(mode, DEFAULT_DIR_MODE))?;
        self.trigger(&p, WatchEventKind::Rename, fs.stat(&p, false).ok());
        Ok(())
    }

    pub fn rmdir(&self, p: &str) -> Result<()> {
        let p = self.resolve("rmdir", p)?;
        self.sync_root()?.rmdir(&p)?;
        self.trigger(&p, WatchEventKind::Rename, None);
        Ok(())
    }

    pub fn unlink(&self, p: &str) -> Result<()> {
        let p = self.resolve("unlink", p)?;
        self.sync_root()?.unlink(&p)?;
        self.trigger(&p, WatchEventKind::Rename, None);
        Ok(())
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = self.resolve("rename", old_path)?;
        let new_path = self.normalize(new_path)?;
        let fs = self.sync_root()?;
        fs.rename(&old_path, &new_path)?;
        self.trigger(&old_path, WatchEventKind::Rename, None);
        self.trigger(&new_path, WatchEventKind::Rename, fs.stat(&new_path, false).ok());
        Ok(())
    }

    pub fn link(&self, src_path: &str, dst_path: &str) -> Result<()> {
        let src_path = self.resolve("link", src_path)?;
        let dst_path = self.normalize(dst_path)?;
        let fs = self.sync_root()?;
        fs.link(&src_path, &dst_path)?;
        self.trigger(&dst_path, WatchEventKind::Rename, fs.stat(&dst_path, false).ok());
        Ok(())
    }

    /// Creates `dst_path` as a link to `target`. `kind` is `"file"` (the
    /// default), `"dir"` or `"junction"`; the target is stored verbatim.
    pub fn symlink(&self, target: &str, dst_path: &str, kind: Option<&str>) -> Result<()> {
        let kind = symlink_kind(kind)?;
        let dst_path = self.resolve("symlink", dst_path)?;
        let fs = self.sync_root()?;
        fs.symlink(target, &dst_path, kind)?;
        self.trigger(&dst_path, WatchEventKind::Rename, fs.stat(&dst_path, true).ok());
        Ok(())
    }

    pub fn readlink(&self, p: &str) -> Result<String> {
        let p = self.resolve("readlink", p)?;
        self.sync_root()?.readlink(&p)
    }

    pub fn chmod(&self, p: &str, mode: Mode) -> Result<()> {
        self.chmod_inner("chmod", p, false, mode)
    }

    pub fn lchmod(&self, p: &str, mode: Mode) -> Result<()> {
        self.chmod_inner("lchmod", p, true, mode)
    }

    fn chmod_inner(&self, op: &'static str, p: &str, is_lchmod: bool, mode: Mode) -> Result<()> {
        let p = self.resolve(op, p)?;
        let bits = mode_bits(&mode)?;
        let fs = self.sync_root()?;
        fs.chmod(&p, is_lchmod, bits)?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, is_lchmod).ok());
        Ok(())
    }

    pub fn chown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.chown_inner("chown", p, false, uid, gid)
    }

    pub fn lchown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.chown_inner("lchown", p, true, uid, gid)
    }

    fn chown_inner(
        &self,
        op: &'static str,
        p: &str,
        is_lchown: bool,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        let p = self.resolve(op, p)?;
        let fs = self.sync_root()?;
        fs.chown(&p, is_lchown, uid, gid)?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, is_lchown).ok());
        Ok(())
    }

    pub fn utimes(
        &self,
        p: &str,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let p = self.resolve("utimes", p)?;
        let (atime, mtime) = (atime.into().to_ms()?, mtime.into().to_ms()?);
        let fs = self.sync_root()?;
        fs.utimes(&p, atime, mtime)?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, false).ok());
        Ok(())
    }

    /// Like [`utimes`](Self::utimes) without following a final symlink.
    /// Backends only update the times of link targets, so a symlink at
    /// `p` is ENOTSUP.
    pub fn lutimes(
        &self,
        p: &str,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let resolved = self.resolve("lutimes", p)?;
        if self.sync_root()?.stat(&resolved, true)?.is_symbolic_link() {
            return Err(ApiError::enotsup());
        }
        self.utimes(p, atime, mtime)
    }

    pub fn truncate(&self, p: &str, len: i64) -> Result<()> {
        let p = self.resolve("truncate", p)?;
        let len = length(len)?;
        let fs = self.sync_root()?;
        fs.truncate(&p, len)?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, false).ok());
        Ok(())
    }

    pub fn read_file(&self, p: &str, flag: FileFlag) -> Result<Vec<u8>> {
        let p = self.resolve("read_file", p)?;
        check_read_flag(flag)?;
        self.sync_root()?.read_file(&p, flag)
    }

    pub fn write_file(
        &self,
        p: &str,
        data: &[u8],
        flag: FileFlag,
        mode: Option<Mode>,
    ) -> Result<()> {
        let p = self.resolve("write_file", p)?;
        check_write_flag(flag)?;
        let fs = self.sync_root()?;
        fs.write_file(&p, data, flag, normalize_mode(mode, DEFAULT_FILE_MODE))?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, false).ok());
        Ok(())
    }

    pub fn append_file(
        &self,
        p: &str,
        data: &[u8],
        flag: FileFlag,
        mode: Option<Mode>,
    ) -> Result<()> {
        let p = self.resolve("append_file", p)?;
        check_append_flag(flag)?;
        let fs = self.sync_root()?;
        fs.append_file(&p, data, flag, normalize_mode(mode, DEFAULT_FILE_MODE))?;
        self.trigger(&p, WatchEventKind::Change, fs.stat(&p, false).ok());
        Ok(())
    }

    pub fn open(&self, p: &str, flag: FileFlag, mode: Option<Mode>) -> Result<Fd> {
        let p = self.resolve("open", p)?;
        let file = self
            .sync_root()?
            .open(&p, flag, normalize_mode(mode, DEFAULT_FILE_MODE))?;
        self.fds.lock().insert(OpenFile::sync(p, file))
    }

    /// Reads into `buf` at `position`, or at the descriptor's cursor.
    pub fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        let file = self.fd(fd)?;
        let mut handle = file.sync_handle()?.lock();
        handle.read(buf, position)
    }

    pub fn write(&self, fd: Fd, buf: &[u8], position: Option<u64>) -> Result<usize> {
        let file = self.fd(fd)?;
        let written = file.sync_handle()?.lock().write(buf, position)?;
        file.mark_dirty();
        Ok(written)
    }

    pub fn fstat(&self, fd: Fd) -> Result<Stats> {
        let file = self.fd(fd)?;
        let handle = file.sync_handle()?.lock();
        handle.stat()
    }

    pub fn ftruncate(&self, fd: Fd, len: i64) -> Result<()> {
        let len = length(len)?;
        let file = self.fd(fd)?;
        file.sync_handle()?.lock().truncate(len)?;
        file.mark_dirty();
        Ok(())
    }

    pub fn fsync(&self, fd: Fd) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = {
            let mut handle = file.sync_handle()?.lock();
            handle.sync()?;
            handle.stat().ok()
        };
        if file.take_dirty() {
            self.trigger(&file.path, WatchEventKind::Change, stats);
        }
        Ok(())
    }

    pub fn fdatasync(&self, fd: Fd) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = {
            let mut handle = file.sync_handle()?.lock();
            handle.datasync()?;
            handle.stat().ok()
        };
        if file.take_dirty() {
            self.trigger(&file.path, WatchEventKind::Change, stats);
        }
        Ok(())
    }

    pub fn fchmod(&self, fd: Fd, mode: Mode) -> Result<()> {
        let bits = mode_bits(&mode)?;
        self.change_metadata(fd, |handle| handle.chmod(bits))
    }

    pub fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> Result<()> {
        self.change_metadata(fd, |handle| handle.chown(uid, gid))
    }

    pub fn futimes(
        &self,
        fd: Fd,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let (atime, mtime) = (atime.into().to_ms()?, mtime.into().to_ms()?);
        self.change_metadata(fd, |handle| handle.utimes(atime, mtime))
    }

    /// Applies a metadata update through the handle and reports it to
    /// watchers right away, as the path-based calls do.
    fn change_metadata(
        &self,
        fd: Fd,
        update: impl FnOnce(&mut dyn File) -> Result<()>,
    ) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = {
            let mut handle = file.sync_handle()?.lock();
            update(&mut **handle)?;
            handle.stat().ok()
        };
        self.trigger(&file.path, WatchEventKind::Change, stats);
        Ok(())
    }

    /// Closes the handle, then frees the descriptor. A failed close keeps
    /// the descriptor open.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = {
            let mut handle = file.sync_handle()?.lock();
            let stats = if file.is_dirty() { handle.stat().ok() } else { None };
            handle.close()?;
            stats
        };
        self.fds.lock().remove(fd)?;
        if file.take_dirty() {
            self.trigger(&file.path, WatchEventKind::Change, stats);
        }
        Ok(())
    }
}

fn symlink_kind(kind: Option<&str>) -> Result<&str> {
    match kind.unwrap_or("file") {
        k @ ("file" | "dir" | "junction") => Ok(k),
        other => Err(ApiError::einval(format!("Invalid type: {other}"))),
    }
}

fn mode_bits(mode: &Mode) -> Result<u16> {
    mode.bits().ok_or_else(|| ApiError::einval("Invalid mode."))
}

fn length(len: i64) -> Result<u64> {
    u64::try_from(len).map_err(|_| ApiError::from_code(ErrorCode::Inval))
}

fn check_read_flag(flag: FileFlag) -> Result<()> {
    if flag.is_readable() {
        Ok(())
    } else {
        Err(ApiError::einval("Flag passed to readFile must allow for reading."))
    }
}

fn check_write_flag(flag: FileFlag) -> Result<()> {
    if flag.is_writeable() {
        Ok(())
    } else {
        Err(ApiError::einval("Flag passed to writeFile must allow for writing."))
    }
}

fn check_append_flag(flag: FileFlag) -> Result<()> {
    if flag.is_appendable() {
        Ok(())
    } else {
        Err(ApiError::einval("Flag passed to appendFile must allow for appending."))
    }
}
