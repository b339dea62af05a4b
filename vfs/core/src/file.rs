//! Open file handle traits.
//!
//! [`File`] is driven by synchronous backends, [`FileAsync`] by
//! asynchronous ones. Operations a handle does not support keep the default
//! body and fail with `ENOTSUP`.

use std::fmt;

use async_trait::async_trait;

use crate::{ApiError, Result, Stats};

pub trait File: fmt::Debug + Send + Sync {
    /// Current cursor position.
    fn pos(&self) -> u64;

    fn stat(&self) -> Result<Stats>;

    /// Reads into `buf` at `position`, or at the cursor when `None`.
    fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize>;

    /// Writes `buf` at `position`, or at the cursor when `None`.
    fn write(&mut self, buf: &[u8], position: Option<u64>) -> Result<usize>;

    fn truncate(&mut self, len: u64) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn datasync(&mut self) -> Result<()> {
        self.sync()
    }

    fn close(&mut self) -> Result<()>;

    fn chmod(&mut self, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn chown(&mut self, _uid: u32, _gid: u32) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn utimes(&mut self, _atime_ms: f64, _mtime_ms: f64) -> Result<()> {
        Err(ApiError::enotsup())
    }

    /// Whole-file buffer for handles that keep their content in memory.
    fn buffer(&self) -> Option<&[u8]> {
        None
    }
}

#[async_trait]
pub trait FileAsync: fmt::Debug + Send + Sync {
    fn pos(&self) -> u64;

    async fn stat(&self) -> Result<Stats>;

    async fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize>;

    async fn write(&mut self, buf: &[u8], position: Option<u64>) -> Result<usize>;

    async fn truncate(&mut self, len: u64) -> Result<()>;

    async fn sync(&mut self) -> Result<()>;

    async fn datasync(&mut self) -> Result<()> {
        self.sync().await
    }

    async fn close(&mut self) -> Result<()>;

    async fn chmod(&mut self, _mode: u16) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn chown(&mut self, _uid: u32, _gid: u32) -> Result<()> {
        Err(ApiError::enotsup())
    }

    async fn utimes(&mut self, _atime_ms: f64, _mtime_ms: f64) -> Result<()> {
        Err(ApiError::enotsup())
    }

    fn buffer(&self) -> Option<&[u8]> {
        None
    }
}
