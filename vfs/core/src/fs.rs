//! Backend traits.
//!
//! Every backend implements [`FileSystem`] (synchronous) or
//! [`FileSystemAsync`] (asynchronous). Each call has a default body, either
//! failing with `ENOTSUP` or composed from other calls, so a backend only
//! implements what it supports. `open`, `read_file`, `write_file`,
//! `append_file`, `truncate`, `exists` and `realpath` are composed.

use std::fmt;

use async_trait::async_trait;

use crate::file::{File, FileAsync};
use crate::file_flag::ActionType;
use crate::stats::DEFAULT_FILE_MODE;
use crate::{ApiError, ErrorCode, FileFlag, Result, Stats, path};

/// Symlink hops followed before a lookup is abandoned.
pub const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskSpace {
    pub total: u64,
    pub free: u64,
}

pub trait FileSystem: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> String;

    fn is_read_only(&self) -> bool;

    fn supports_links(&self) -> bool;

    fn supports_props(&self) -> bool;

    fn supports_synch(&self) -> bool {
        true
    }

    fn disk_space(&self, _path: &str) -> DiskSpace {
        DiskSpace::default()
    }

    fn rename(&self, _old_path: &str, _new_path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn stat(&self, _path: &str, _is_lstat: bool) -> Result<Stats> {
        Err(ApiError::enotsup())
    }

    /// Opens `path`, creating, truncating or refusing according to the
    /// flag's path-exists and path-not-exists actions.
    fn open(&self, path: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn File>> {
        let stats = match self.stat(path, false) {
            Ok(stats) => stats,
            Err(e) if e.errno() == ErrorCode::Noent => {
                return match flag.path_not_exists_action() {
                    ActionType::CreateFile => {
                        let parent = path::dirname(path);
                        let parent_stats = self.stat(parent, false)?;
                        if !parent_stats.is_directory() {
                            return Err(ApiError::enotdir(parent));
                        }
                        self.create_file(path, flag, mode)
                    }
                    ActionType::ThrowException => Err(ApiError::enoent(path)),
                    _ => Err(ApiError::einval("Invalid FileFlag object.")),
                };
            }
            Err(e) => return Err(e),
        };
        if stats.is_directory() {
            return Err(ApiError::eisdir(path));
        }
        match flag.path_exists_action() {
            ActionType::ThrowException => Err(ApiError::eexist(path)),
            ActionType::TruncateFile => {
                self.unlink(path)?;
                self.create_file(path, flag, stats.permissions())
            }
            ActionType::Nop => self.open_file(path, flag),
            ActionType::CreateFile => Err(ApiError::einval("Invalid FileFlag object.")),
        }
    }

    /// Opens an existing file; used by the default [`open`](Self::open).
    fn open_file(&self, _path: &str, _flag: FileFlag) -> Result<Box<dyn File>> {
        Err(ApiError::enotsup())
    }

    /// Creates a new, empty file; used by the default [`open`](Self::open).
    fn create_file(&self, _path: &str, _flag: FileFlag, _mode: u16) -> Result<Box<dyn File>> {
        Err(ApiError::enotsup())
    }

    fn unlink(&self, _path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn rmdir(&self, _path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn mkdir(&self, _path: &str, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn readdir(&self, _path: &str) -> Result<Vec<String>> {
        Err(ApiError::enotsup())
    }

    fn exists(&self, path: &str) -> bool {
        self.stat(path, false).is_ok()
    }

    fn realpath(&self, path: &str) -> Result<String> {
        if self.supports_links() {
            realpath_with_links(path, MAX_SYMLINK_HOPS, &mut |p| self.stat(p, true), &mut |p| {
                self.readlink(p)
            })
        } else if self.exists(path) {
            Ok(path.to_owned())
        } else {
            Err(ApiError::enoent(path))
        }
    }

    fn truncate(&self, path: &str, len: u64) -> Result<()> {
        let mut fd = self.open(path, FileFlag::ReadWrite, DEFAULT_FILE_MODE)?;
        let res = fd.truncate(len);
        finish(res, fd.close())
    }

    fn read_file(&self, path: &str, flag: FileFlag) -> Result<Vec<u8>> {
        let mut fd = self.open(path, flag, DEFAULT_FILE_MODE)?;
        let res = read_all(fd.as_mut());
        let closed = fd.close();
        let data = res?;
        closed?;
        Ok(data)
    }

    fn write_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        let mut fd = self.open(path, flag, mode)?;
        let res = fd.write(data, Some(0)).map(|_| ());
        finish(res, fd.close())
    }

    fn append_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        let mut fd = self.open(path, flag, mode)?;
        let res = fd.write(data, None).map(|_| ());
        finish(res, fd.close())
    }

    fn chmod(&self, _path: &str, _is_lchmod: bool, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn chown(&self, _path: &str, _is_lchown: bool, _uid: u32, _gid: u32) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn utimes(&self, _path: &str, _atime_ms: f64, _mtime_ms: f64) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn link(&self, _src_path: &str, _dst_path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn symlink(&self, _src_path: &str, _dst_path: &str, _kind: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn readlink(&self, _path: &str) -> Result<String> {
        Err(ApiError::enotsup())
    }
}

#[async_trait]
pub trait FileSystemAsync: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> String;

    fn is_read_only(&self) -> bool;

    fn supports_links(&self) -> bool;

    fn supports_props(&self) -> bool;

    fn supports_synch(&self) -> bool {
        false
    }

    async fn disk_space(&self, _path: &str) -> DiskSpace {
        DiskSpace::default()
    }

    async fn rename(&self, _old_path: &str, _new_path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn stat(&self, _path: &str, _is_lstat: bool) -> Result<Stats> {
        Err(ApiError::enotsup())
    }

    async fn open(&self, path: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn FileAsync>> {
        let stats = match self.stat(path, false).await {
            Ok(stats) => stats,
            Err(e) if e.errno() == ErrorCode::Noent => {
                return match flag.path_not_exists_action() {
                    ActionType::CreateFile => {
                        let parent = path::dirname(path);
                        let parent_stats = self.stat(parent, false).await?;
                        if !parent_stats.is_directory() {
                            return Err(ApiError::enotdir(parent));
                        }
                        self.create_file(path, flag, mode).await
                    }
                    ActionType::ThrowException => Err(ApiError::enoent(path)),
                    _ => Err(ApiError::einval("Invalid FileFlag object.")),
                };
            }
            Err(e) => return Err(e),
        };
        if stats.is_directory() {
            return Err(ApiError::eisdir(path));
        }
        match flag.path_exists_action() {
            ActionType::ThrowException => Err(ApiError::eexist(path)),
            ActionType::TruncateFile => {
                self.unlink(path).await?;
                self.create_file(path, flag, stats.permissions()).await
            }
            ActionType::Nop => self.open_file(path, flag).await,
            ActionType::CreateFile => Err(ApiError::einval("Invalid FileFlag object.")),
        }
    }

    async fn open_file(&self, _path: &str, _flag: FileFlag) -> Result<Box<dyn FileAsync>> {
        Err(ApiError::enotsup())
    }

    async fn create_file(
        &self,
        _path: &str,
        _flag: FileFlag,
        _mode: u16,
    ) -> Result<Box<dyn FileAsync>> {
        Err(ApiError::enotsup())
    }

    async fn unlink(&self, _path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn rmdir(&self, _path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn mkdir(&self, _path: &str, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn readdir(&self, _path: &str) -> Result<Vec<String>> {
        Err(ApiError::enotsup())
    }

    async fn exists(&self, path: &str) -> bool {
        self.stat(path, false).await.is_ok()
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        if !self.supports_links() {
            return if self.exists(path).await {
                Ok(path.to_owned())
            } else {
                Err(ApiError::enoent(path))
            };
        }
        let mut target = path::normalize(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let mut resolved = String::from("/");
            let mut redirected = None;
            let segments: Vec<&str> = path::segments(&target).collect();
            for (i, seg) in segments.iter().enumerate() {
                let candidate = path::join(&resolved, seg);
                let stats = self.stat(&candidate, true).await?;
                if stats.is_symbolic_link() {
                    let link = self.readlink(&candidate).await?;
                    let mut next = path::resolve(&resolved, &link);
                    for rest in &segments[i + 1..] {
                        next = path::join(&next, rest);
                    }
                    redirected = Some(next);
                    break;
                }
                resolved = candidate;
            }
            match redirected {
                Some(next) => target = next,
                None => return Ok(resolved),
            }
        }
        Err(ApiError::einval(format!(
            "Too many symbolic links encountered resolving '{path}'."
        )))
    }

    async fn truncate(&self, path: &str, len: u64) -> Result<()> {
        let mut fd = self
            .open(path, FileFlag::ReadWrite, DEFAULT_FILE_MODE)
            .await?;
        let res = fd.truncate(len).await;
        finish(res, fd.close().await)
    }

    async fn read_file(&self, path: &str, flag: FileFlag) -> Result<Vec<u8>> {
        let mut fd = self.open(path, flag, DEFAULT_FILE_MODE).await?;
        let res = read_all_async(fd.as_mut()).await;
        let closed = fd.close().await;
        let data = res?;
        closed?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        let mut fd = self.open(path, flag, mode).await?;
        let res = fd.write(data, Some(0)).await.map(|_| ());
        finish(res, fd.close().await)
    }

    async fn append_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        let mut fd = self.open(path, flag, mode).await?;
        let res = fd.write(data, None).await.map(|_| ());
        finish(res, fd.close().await)
    }

    async fn chmod(&self, _path: &str, _is_lchmod: bool, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn chown(&self, _path: &str, _is_lchown: bool, _uid: u32, _gid: u32) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn utimes(&self, _path: &str, _atime_ms: f64, _mtime_ms: f64) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn link(&self, _src_path: &str, _dst_path: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn symlink(&self, _src_path: &str, _dst_path: &str, _kind: &str) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn readlink(&self, _path: &str) -> Result<String> {
        Err(ApiError::enotsup())
    }
}

/// Returns the first error of an operation and the close that followed it.
fn finish(res: Result<()>, closed: Result<()>) -> Result<()> {
    res?;
    closed
}

fn read_all(fd: &mut dyn File) -> Result<Vec<u8>> {
    let size = fd.stat()?.size;
    let mut buf = vec![0u8; usize::try_from(size).map_err(|_| ApiError::from_code(ErrorCode::Fbig))?];
    let n = fd.read(&mut buf, Some(0))?;
    buf.truncate(n);
    Ok(buf)
}

async fn read_all_async(fd: &mut dyn FileAsync) -> Result<Vec<u8>> {
    let size = fd.stat().await?.size;
    let mut buf = vec![0u8; usize::try_from(size).map_err(|_| ApiError::from_code(ErrorCode::Fbig))?];
    let n = fd.read(&mut buf, Some(0)).await?;
    buf.truncate(n);
    Ok(buf)
}

/// Resolves every symlink along `path` using the supplied `lstat` and
/// `readlink`, following at most `max_hops` links.
pub fn realpath_with_links(
    path: &str,
    max_hops: usize,
    lstat: &mut dyn FnMut(&str) -> Result<Stats>,
    readlink: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<String> {
    let mut target = path::normalize(path);
    for _ in 0..max_hops {
        let mut resolved = String::from("/");
        let mut redirected = None;
        let segments: Vec<&str> = path::segments(&target).collect();
        for (i, seg) in segments.iter().enumerate() {
            let candidate = path::join(&resolved, seg);
            if lstat(&candidate)?.is_symbolic_link() {
                let mut next = path::resolve(&resolved, &readlink(&candidate)?);
                for rest in &segments[i + 1..] {
                    next = path::join(&next, rest);
                }
                redirected = Some(next);
                break;
            }
            resolved = candidate;
        }
        match redirected {
            Some(next) => {
                tracing::trace!(from = %target, to = %next, "following symbolic link");
                target = next;
            }
            None => return Ok(resolved),
        }
    }
    Err(ApiError::einval(format!(
        "Too many symbolic links encountered resolving '{path}'."
    )))
}
