//! Fully buffered, dirty-tracked file handle.
//!
//! A [`PreloadFile`] holds the whole file content in memory. Reads, writes
//! and truncation only touch that buffer; the owning backend sees the new
//! content when the handle is synced or closed, and only if it is dirty.

use async_trait::async_trait;

use crate::file::{File, FileAsync};
use crate::stats::{MAX_FILE_SIZE, Stats, now_ms};
use crate::{ApiError, ErrorCode, FileFlag, Result};

/// Where a synchronous [`PreloadFile`] persists its content.
pub trait SyncBacking: Send + Sync {
    fn supports_props(&self) -> bool;

    fn sync_file(&self, path: &str, data: &[u8], stats: &Stats) -> Result<()>;

    /// Called once when the handle is closed, after the final sync.
    fn release(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// Where an asynchronous [`PreloadFile`] persists its content.
#[async_trait]
pub trait AsyncBacking: Send + Sync {
    fn supports_props(&self) -> bool;

    async fn sync_file(&self, path: &str, data: &[u8], stats: &Stats) -> Result<()>;

    async fn release(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// Backing for read-only backends: syncing and closing do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSync;

impl SyncBacking for NoSync {
    fn supports_props(&self) -> bool {
        false
    }

    fn sync_file(&self, _path: &str, _data: &[u8], _stats: &Stats) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AsyncBacking for NoSync {
    fn supports_props(&self) -> bool {
        false
    }

    async fn sync_file(&self, _path: &str, _data: &[u8], _stats: &Stats) -> Result<()> {
        Ok(())
    }
}

pub type NoSyncFile = PreloadFile<NoSync>;

pub struct PreloadFile<B> {
    backing: B,
    path: String,
    flag: FileFlag,
    stats: Stats,
    buffer: Vec<u8>,
    pos: u64,
    dirty: bool,
    closed: bool,
}

impl<B> std::fmt::Debug for PreloadFile<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadFile")
            .field("path", &self.path)
            .field("flag", &self.flag)
            .field("size", &self.stats.size)
            .field("pos", &self.pos)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<B> PreloadFile<B> {
    /// Wraps `contents` as the open file at `path`.
    ///
    /// For readable flags the buffer must match `stats.size`; writeable-only
    /// modes may truncate or append, so they are not checked.
    pub fn new(
        backing: B,
        path: impl Into<String>,
        flag: FileFlag,
        stats: Stats,
        contents: Vec<u8>,
    ) -> Result<Self> {
        let path = path.into();
        if flag.is_readable() && stats.size != contents.len() as u64 {
            return Err(ApiError::einval(format!(
                "Invalid buffer: Buffer is {} long, yet Stats object specifies that file is {} long.",
                contents.len(),
                stats.size
            )));
        }
        Ok(Self {
            backing,
            path,
            flag,
            stats,
            buffer: contents,
            pos: 0,
            dirty: false,
            closed: false,
        })
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flag(&self) -> FileFlag {
        self.flag
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Cursor position; appendable handles always sit at the end.
    pub fn position(&self) -> u64 {
        if self.flag.is_appendable() {
            self.stats.size
        } else {
            self.pos
        }
    }

    pub fn set_pos(&mut self, pos: u64) -> u64 {
        self.pos = pos;
        pos
    }

    pub fn advance_pos(&mut self, delta: u64) -> u64 {
        self.pos += delta;
        self.pos
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ApiError::with_message(
                ErrorCode::Badf,
                format!("File '{}' is closed.", self.path),
            ))
        } else {
            Ok(())
        }
    }

    fn read_buffered(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        self.ensure_open()?;
        if !self.flag.is_readable() {
            return Err(ApiError::with_message(
                ErrorCode::Perm,
                "File not opened with a readable mode.",
            ));
        }
        let position = position.unwrap_or_else(|| self.position());
        let size = self.stats.size.min(self.buffer.len() as u64);
        let start = position.min(size) as usize;
        let end = (position.saturating_add(buf.len() as u64)).min(size) as usize;
        let n = end - start;
        buf[..n].copy_from_slice(&self.buffer[start..end]);
        self.stats.atime_ms = now_ms();
        self.pos = position + n as u64;
        Ok(n)
    }

    fn write_buffered(&mut self, data: &[u8], position: Option<u64>) -> Result<usize> {
        self.ensure_open()?;
        if !self.flag.is_writeable() {
            return Err(ApiError::with_message(
                ErrorCode::Perm,
                "File not opened with a writeable mode.",
            ));
        }
        let position = position.unwrap_or_else(|| self.position());
        let end = position
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or_else(|| ApiError::with_message(ErrorCode::Fbig, "Write position is too large."))?;
        let (start, end) = (position as usize, end as usize);
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        if end as u64 > self.stats.size {
            self.stats.set_size(end as u64);
        }
        self.buffer[start..end].copy_from_slice(data);
        self.stats.mtime_ms = now_ms();
        self.dirty = true;
        self.pos = end as u64;
        Ok(data.len())
    }

    fn truncate_buffered(&mut self, len: u64) -> Result<()> {
        self.ensure_open()?;
        if !self.flag.is_writeable() {
            return Err(ApiError::with_message(
                ErrorCode::Perm,
                "File not opened with a writeable mode.",
            ));
        }
        if len > MAX_FILE_SIZE {
            return Err(ApiError::with_message(
                ErrorCode::Fbig,
                "Truncate length is too large.",
            ));
        }
        let len_usize = len as usize;
        self.buffer.resize(len_usize, 0);
        self.stats.set_size(len);
        self.stats.mtime_ms = now_ms();
        self.dirty = true;
        Ok(())
    }

    fn chmod_buffered(&mut self, supports_props: bool, mode: u16) -> Result<()> {
        self.ensure_open()?;
        if !supports_props {
            return Err(ApiError::enotsup());
        }
        self.stats.chmod(mode);
        self.dirty = true;
        Ok(())
    }

    fn chown_buffered(&mut self, supports_props: bool, uid: u32, gid: u32) -> Result<()> {
        self.ensure_open()?;
        if !supports_props {
            return Err(ApiError::enotsup());
        }
        self.stats.uid = uid;
        self.stats.gid = gid;
        self.dirty = true;
        Ok(())
    }

    fn utimes_buffered(&mut self, supports_props: bool, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.ensure_open()?;
        if !supports_props {
            return Err(ApiError::enotsup());
        }
        self.stats.atime_ms = atime_ms;
        self.stats.mtime_ms = mtime_ms;
        self.dirty = true;
        Ok(())
    }
}

impl<B: SyncBacking> PreloadFile<B> {
    fn sync_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            tracing::trace!(path = %self.path, size = self.buffer.len(), "syncing preloaded file");
            self.backing.sync_file(&self.path, &self.buffer, &self.stats)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl<B: SyncBacking> File for PreloadFile<B> {
    fn pos(&self) -> u64 {
        self.position()
    }

    fn stat(&self) -> Result<Stats> {
        self.ensure_open()?;
        Ok(self.stats.clone())
    }

    fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        self.read_buffered(buf, position)
    }

    fn write(&mut self, buf: &[u8], position: Option<u64>) -> Result<usize> {
        let n = self.write_buffered(buf, position)?;
        if self.flag.is_synchronous() {
            self.sync_if_dirty()?;
        }
        Ok(n)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.truncate_buffered(len)?;
        if self.flag.is_synchronous() {
            self.sync_if_dirty()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.sync_if_dirty()
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.sync_if_dirty()?;
        self.closed = true;
        self.backing.release(&self.path)
    }

    fn chmod(&mut self, mode: u16) -> Result<()> {
        self.chmod_buffered(self.backing.supports_props(), mode)?;
        self.sync_if_dirty()
    }

    fn chown(&mut self, uid: u32, gid: u32) -> Result<()> {
        self.chown_buffered(self.backing.supports_props(), uid, gid)?;
        self.sync_if_dirty()
    }

    fn utimes(&mut self, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.utimes_buffered(self.backing.supports_props(), atime_ms, mtime_ms)?;
        self.sync_if_dirty()
    }

    fn buffer(&self) -> Option<&[u8]> {
        Some(&self.buffer)
    }
}

impl<B: AsyncBacking> PreloadFile<B> {
    async fn sync_if_dirty_async(&mut self) -> Result<()> {
        if self.dirty {
            tracing::trace!(path = %self.path, size = self.buffer.len(), "syncing preloaded file");
            self.backing
                .sync_file(&self.path, &self.buffer, &self.stats)
                .await?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[async_trait]
impl<B: AsyncBacking> FileAsync for PreloadFile<B> {
    fn pos(&self) -> u64 {
        self.position()
    }

    async fn stat(&self) -> Result<Stats> {
        self.ensure_open()?;
        Ok(self.stats.clone())
    }

    async fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        self.read_buffered(buf, position)
    }

    async fn write(&mut self, buf: &[u8], position: Option<u64>) -> Result<usize> {
        let n = self.write_buffered(buf, position)?;
        if self.flag.is_synchronous() {
            self.sync_if_dirty_async().await?;
        }
        Ok(n)
    }

    async fn truncate(&mut self, len: u64) -> Result<()> {
        self.truncate_buffered(len)?;
        if self.flag.is_synchronous() {
            self.sync_if_dirty_async().await?;
        }
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.sync_if_dirty_async().await
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.sync_if_dirty_async().await?;
        self.closed = true;
        self.backing.release(&self.path).await
    }

    async fn chmod(&mut self, mode: u16) -> Result<()> {
        self.chmod_buffered(self.backing.supports_props(), mode)?;
        self.sync_if_dirty_async().await
    }

    async fn chown(&mut self, uid: u32, gid: u32) -> Result<()> {
        self.chown_buffered(self.backing.supports_props(), uid, gid)?;
        self.sync_if_dirty_async().await
    }

    async fn utimes(&mut self, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.utimes_buffered(self.backing.supports_props(), atime_ms, mtime_ms)?;
        self.sync_if_dirty_async().await
    }

    fn buffer(&self) -> Option<&[u8]> {
        Some(&self.buffer)
    }
}
