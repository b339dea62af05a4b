//! The `*_async` surface.

use std::future::Future;

use bfs_core::{ApiError, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DiskSpace, FileFlag, Result, Stats};
use tokio::runtime::Handle as RuntimeHandle;
use tokio::task::JoinHandle;

use super::{
    Facade, check_append_flag, check_read_flag, check_write_flag, length, mode_bits, symlink_kind,
};
use crate::fd::{Fd, Handle, OpenFile};
use crate::normalize::{Mode, TimeArg, normalize_mode};
use crate::watch::WatchEventKind;

/// Runs `op` on the current tokio runtime and hands its result to
/// `callback`. The callback never runs before `defer` returns.
pub fn defer<T, F, C>(op: F, callback: C) -> Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
{
    let runtime = RuntimeHandle::try_current()
        .map_err(|_| ApiError::eio("No async runtime is available to run the callback."))?;
    Ok(runtime.spawn(async move {
        tokio::task::yield_now().await;
        callback(op.await);
    }))
}

impl Facade {
    pub async fn disk_space_async(&self, p: &str) -> Result<DiskSpace> {
        let p = self.resolve("disk_space", p)?;
        Ok(self.async_root()?.disk_space(&p).await)
    }

    pub async fn stat_async(&self, p: &str) -> Result<Stats> {
        let p = self.resolve("stat", p)?;
        self.async_root()?.stat(&p, false).await
    }

    pub async fn lstat_async(&self, p: &str) -> Result<Stats> {
        let p = self.resolve("lstat", p)?;
        self.async_root()?.stat(&p, true).await
    }

    pub async fn exists_async(&self, p: &str) -> bool {
        let Ok(p) = self.resolve("exists", p) else {
            return false;
        };
        match self.async_root() {
            Ok(fs) => fs.exists(&p).await,
            Err(_) => false,
        }
    }

    pub async fn realpath_async(&self, p: &str) -> Result<String> {
        let p = self.resolve("realpath", p)?;
        self.async_root()?.realpath(&p).await
    }

    pub async fn readdir_async(&self, p: &str) -> Result<Vec<String>> {
        let p = self.resolve("readdir", p)?;
        self.async_root()?.readdir(&p).await
    }

    pub async fn mkdir_async(&self, p: &str, mode: Option<Mode>) -> Result<()> {
        let p = self.resolve("mkdir", p)?;
        let fs = self.async_root()?;
        fs.mkdir(&p, normalize_mode(mode, DEFAULT_DIR_MODE)).await?;
        let stats = fs.stat(&p, false).await.ok();
        self.trigger(&p, WatchEventKind::Rename, stats);
        Ok(())
    }

    pub async fn rmdir_async(&self, p: &str) -> Result<()> {
        let p = self.resolve("rmdir", p)?;
        self.async_root()?.rmdir(&p).await?;
        self.trigger(&p, WatchEventKind::Rename, None);
        Ok(())
    }

    pub async fn unlink_async(&self, p: &str) -> Result<()> {
        let p = self.resolve("unlink", p)?;
        self.async_root()?.unlink(&p).await?;
        self.trigger(&p, WatchEventKind::Rename, None);
        Ok(())
    }

    pub async fn rename_async(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = self.resolve("rename", old_path)?;
        let new_path = self.normalize(new_path)?;
        let fs = self.async_root()?;
        fs.rename(&old_path, &new_path).await?;
        self.trigger(&old_path, WatchEventKind::Rename, None);
        let stats = fs.stat(&new_path, false).await.ok();
        self.trigger(&new_path, WatchEventKind::Rename, stats);
        Ok(())
    }

    pub async fn link_async(&self, src_path: &str, dst_path: &str) -> Result<()> {
        let src_path = self.resolve("link", src_path)?;
        let dst_path = self.normalize(dst_path)?;
        let fs = self.async_root()?;
        fs.link(&src_path, &dst_path).await?;
        let stats = fs.stat(&dst_path, false).await.ok();
        self.trigger(&dst_path, WatchEventKind::Rename, stats);
        Ok(())
    }

    pub async fn symlink_async(
        &self,
        target: &str,
        dst_path: &str,
        kind: Option<&str>,
    ) -> Result<()> {
        let kind = symlink_kind(kind)?;
        let dst_path = self.resolve("symlink", dst_path)?;
        let fs = self.async_root()?;
        fs.symlink(target, &dst_path, kind).await?;
        let stats = fs.stat(&dst_path, true).await.ok();
        self.trigger(&dst_path, WatchEventKind::Rename, stats);
        Ok(())
    }

    pub async fn readlink_async(&self, p: &str) -> Result<String> {
        let p = self.resolve("readlink", p)?;
        self.async_root()?.readlink(&p).await
    }

    pub async fn chmod_async(&self, p: &str, mode: Mode) -> Result<()> {
        self.chmod_async_inner("chmod", p, false, mode).await
    }

    pub async fn lchmod_async(&self, p: &str, mode: Mode) -> Result<()> {
        self.chmod_async_inner("lchmod", p, true, mode).await
    }

    async fn chmod_async_inner(
        &self,
        op: &'static str,
        p: &str,
        is_lchmod: bool,
        mode: Mode,
    ) -> Result<()> {
        let p = self.resolve(op, p)?;
        let bits = mode_bits(&mode)?;
        let fs = self.async_root()?;
        fs.chmod(&p, is_lchmod, bits).await?;
        let stats = fs.stat(&p, is_lchmod).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn chown_async(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.chown_async_inner("chown", p, false, uid, gid).await
    }

    pub async fn lchown_async(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.chown_async_inner("lchown", p, true, uid, gid).await
    }

    async fn chown_async_inner(
        &self,
        op: &'static str,
        p: &str,
        is_lchown: bool,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        let p = self.resolve(op, p)?;
        let fs = self.async_root()?;
        fs.chown(&p, is_lchown, uid, gid).await?;
        let stats = fs.stat(&p, is_lchown).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn utimes_async(
        &self,
        p: &str,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let p = self.resolve("utimes", p)?;
        let (atime, mtime) = (atime.into().to_ms()?, mtime.into().to_ms()?);
        let fs = self.async_root()?;
        fs.utimes(&p, atime, mtime).await?;
        let stats = fs.stat(&p, false).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn lutimes_async(
        &self,
        p: &str,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let resolved = self.resolve("lutimes", p)?;
        if self
            .async_root()?
            .stat(&resolved, true)
            .await?
            .is_symbolic_link()
        {
            return Err(ApiError::enotsup());
        }
        self.utimes_async(p, atime, mtime).await
    }

    pub async fn truncate_async(&self, p: &str, len: i64) -> Result<()> {
        let p = self.resolve("truncate", p)?;
        let len = length(len)?;
        let fs = self.async_root()?;
        fs.truncate(&p, len).await?;
        let stats = fs.stat(&p, false).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn read_file_async(&self, p: &str, flag: FileFlag) -> Result<Vec<u8>> {
        let p = self.resolve("read_file", p)?;
        check_read_flag(flag)?;
        self.async_root()?.read_file(&p, flag).await
    }

    pub async fn write_file_async(
        &self,
        p: &str,
        data: &[u8],
        flag: FileFlag,
        mode: Option<Mode>,
    ) -> Result<()> {
        let p = self.resolve("write_file", p)?;
        check_write_flag(flag)?;
        let fs = self.async_root()?;
        fs.write_file(&p, data, flag, normalize_mode(mode, DEFAULT_FILE_MODE))
            .await?;
        let stats = fs.stat(&p, false).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn append_file_async(
        &self,
        p: &str,
        data: &[u8],
        flag: FileFlag,
        mode: Option<Mode>,
    ) -> Result<()> {
        let p = self.resolve("append_file", p)?;
        check_append_flag(flag)?;
        let fs = self.async_root()?;
        fs.append_file(&p, data, flag, normalize_mode(mode, DEFAULT_FILE_MODE))
            .await?;
        let stats = fs.stat(&p, false).await.ok();
        self.trigger(&p, WatchEventKind::Change, stats);
        Ok(())
    }

    /// Opens `p`. Synchronous backends yield descriptors usable from both
    /// surfaces.
    pub async fn open_async(&self, p: &str, flag: FileFlag, mode: Option<Mode>) -> Result<Fd> {
        let p = self.resolve("open", p)?;
        let mode = normalize_mode(mode, DEFAULT_FILE_MODE);
        let open = match self.sync_root() {
            Ok(fs) => {
                let file = fs.open(&p, flag, mode)?;
                OpenFile::sync(p, file)
            }
            Err(_) => {
                let file = self.async_root()?.open(&p, flag, mode).await?;
                OpenFile::asynchronous(p, file)
            }
        };
        self.fds.lock().insert(open)
    }

    pub async fn read_async(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        let file = self.fd(fd)?;
        match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.read(buf, position)
            }
            Handle::Async(h) => h.lock().await.read(buf, position).await,
        }
    }

    pub async fn write_async(&self, fd: Fd, buf: &[u8], position: Option<u64>) -> Result<usize> {
        let file = self.fd(fd)?;
        let written = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.write(buf, position)?
            }
            Handle::Async(h) => h.lock().await.write(buf, position).await?,
        };
        file.mark_dirty();
        Ok(written)
    }

    pub async fn fstat_async(&self, fd: Fd) -> Result<Stats> {
        let file = self.fd(fd)?;
        match &file.handle {
            Handle::Sync(h) => {
                let handle = h.lock();
                handle.stat()
            }
            Handle::Async(h) => h.lock().await.stat().await,
        }
    }

    pub async fn ftruncate_async(&self, fd: Fd, len: i64) -> Result<()> {
        let len = length(len)?;
        let file = self.fd(fd)?;
        match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.truncate(len)?;
            }
            Handle::Async(h) => h.lock().await.truncate(len).await?,
        }
        file.mark_dirty();
        Ok(())
    }

    pub async fn fsync_async(&self, fd: Fd) -> Result<()> {
        self.flush_async(fd, false).await
    }

    pub async fn fdatasync_async(&self, fd: Fd) -> Result<()> {
        self.flush_async(fd, true).await
    }

    async fn flush_async(&self, fd: Fd, data_only: bool) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                if data_only {
                    handle.datasync()?;
                } else {
                    handle.sync()?;
                }
                handle.stat().ok()
            }
            Handle::Async(h) => {
                let mut handle = h.lock().await;
                if data_only {
                    handle.datasync().await?;
                } else {
                    handle.sync().await?;
                }
                handle.stat().await.ok()
            }
        };
        if file.take_dirty() {
            self.trigger(&file.path, WatchEventKind::Change, stats);
        }
        Ok(())
    }

    pub async fn fchmod_async(&self, fd: Fd, mode: Mode) -> Result<()> {
        let bits = mode_bits(&mode)?;
        let file = self.fd(fd)?;
        let stats = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.chmod(bits)?;
                handle.stat().ok()
            }
            Handle::Async(h) => {
                let mut handle = h.lock().await;
                handle.chmod(bits).await?;
                handle.stat().await.ok()
            }
        };
        self.trigger(&file.path, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn fchown_async(&self, fd: Fd, uid: u32, gid: u32) -> Result<()> {
        let file = self.fd(fd)?;
        let stats = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.chown(uid, gid)?;
                handle.stat().ok()
            }
            Handle::Async(h) => {
                let mut handle = h.lock().await;
                handle.chown(uid, gid).await?;
                handle.stat().await.ok()
            }
        };
        self.trigger(&file.path, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn futimes_async(
        &self,
        fd: Fd,
        atime: impl Into<TimeArg>,
        mtime: impl Into<TimeArg>,
    ) -> Result<()> {
        let (atime, mtime) = (atime.into().to_ms()?, mtime.into().to_ms()?);
        let file = self.fd(fd)?;
        let stats = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                handle.utimes(atime, mtime)?;
                handle.stat().ok()
            }
            Handle::Async(h) => {
                let mut handle = h.lock().await;
                handle.utimes(atime, mtime).await?;
                handle.stat().await.ok()
            }
        };
        self.trigger(&file.path, WatchEventKind::Change, stats);
        Ok(())
    }

    pub async fn close_async(&self, fd: Fd) -> Result<()> {
        let file = self.fd(fd)?;
        let dirty = file.is_dirty();
        let stats = match &file.handle {
            Handle::Sync(h) => {
                let mut handle = h.lock();
                let stats = if dirty { handle.stat().ok() } else { None };
                handle.close()?;
                stats
            }
            Handle::Async(h) => {
                let mut handle = h.lock().await;
                let stats = if dirty { handle.stat().await.ok() } else { None };
                handle.close().await?;
                stats
            }
        };
        self.fds.lock().remove(fd)?;
        if file.take_dirty() {
            self.trigger(&file.path, WatchEventKind::Change, stats);
        }
        Ok(())
    }
}
