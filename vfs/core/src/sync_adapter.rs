//! Exposes a synchronous backend through the asynchronous traits.
//!
//! Calls run inline on the polling task. Synchronous backends here are
//! memory-backed, so no blocking pool is involved.

use std::sync::Arc;

use async_trait::async_trait;

use crate::file::{File, FileAsync};
use crate::fs::{DiskSpace, FileSystem, FileSystemAsync};
use crate::{FileFlag, Result, Stats};

#[derive(Debug, Clone)]
pub struct AsyncFsFromSync {
    inner: Arc<dyn FileSystem>,
}

impl AsyncFsFromSync {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }
}

#[async_trait]
impl FileSystemAsync for AsyncFsFromSync {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn supports_links(&self) -> bool {
        self.inner.supports_links()
    }

    fn supports_props(&self) -> bool {
        self.inner.supports_props()
    }

    fn supports_synch(&self) -> bool {
        self.inner.supports_synch()
    }

    async fn disk_space(&self, path: &str) -> DiskSpace {
        self.inner.disk_space(path)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.inner.rename(old_path, new_path)
    }

    async fn stat(&self, path: &str, is_lstat: bool) -> Result<Stats> {
        self.inner.stat(path, is_lstat)
    }

    async fn open(&self, path: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn FileAsync>> {
        let file = self.inner.open(path, flag, mode)?;
        Ok(Box::new(FileAsyncFromSync::new(file)))
    }

    async fn open_file(&self, path: &str, flag: FileFlag) -> Result<Box<dyn FileAsync>> {
        let file = self.inner.open_file(path, flag)?;
        Ok(Box::new(FileAsyncFromSync::new(file)))
    }

    async fn create_file(
        &self,
        path: &str,
        flag: FileFlag,
        mode: u16,
    ) -> Result<Box<dyn FileAsync>> {
        let file = self.inner.create_file(path, flag, mode)?;
        Ok(Box::new(FileAsyncFromSync::new(file)))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.inner.unlink(path)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.inner.rmdir(path)
    }

    async fn mkdir(&self, path: &str, mode: u16) -> Result<()> {
        self.inner.mkdir(path, mode)
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.inner.readdir(path)
    }

    async fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        self.inner.realpath(path)
    }

    async fn truncate(&self, path: &str, len: u64) -> Result<()> {
        self.inner.truncate(path, len)
    }

    async fn read_file(&self, path: &str, flag: FileFlag) -> Result<Vec<u8>> {
        self.inner.read_file(path, flag)
    }

    async fn write_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.inner.write_file(path, data, flag, mode)
    }

    async fn append_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.inner.append_file(path, data, flag, mode)
    }

    async fn chmod(&self, path: &str, is_lchmod: bool, mode: u16) -> Result<()> {
        self.inner.chmod(path, is_lchmod, mode)
    }

    async fn chown(&self, path: &str, is_lchown: bool, uid: u32, gid: u32) -> Result<()> {
        self.inner.chown(path, is_lchown, uid, gid)
    }

    async fn utimes(&self, path: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.inner.utimes(path, atime_ms, mtime_ms)
    }

    async fn link(&self, src_path: &str, dst_path: &str) -> Result<()> {
        self.inner.link(src_path, dst_path)
    }

    async fn symlink(&self, src_path: &str, dst_path: &str, kind: &str) -> Result<()> {
        self.inner.symlink(src_path, dst_path, kind)
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        self.inner.readlink(path)
    }
}

#[derive(Debug)]
pub struct FileAsyncFromSync {
    inner: Box<dyn File>,
}

impl FileAsyncFromSync {
    pub fn new(inner: Box<dyn File>) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> Box<dyn File> {
        self.inner
    }
}

#[async_trait]
impl FileAsync for FileAsyncFromSync {
    fn pos(&self) -> u64 {
        self.inner.pos()
    }

    async fn stat(&self) -> Result<Stats> {
        self.inner.stat()
    }

    async fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> Result<usize> {
        self.inner.read(buf, position)
    }

    async fn write(&mut self, buf: &[u8], position: Option<u64>) -> Result<usize> {
        self.inner.write(buf, position)
    }

    async fn truncate(&mut self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }

    async fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }

    async fn datasync(&mut self) -> Result<()> {
        self.inner.datasync()
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    async fn chmod(&mut self, mode: u16) -> Result<()> {
        self.inner.chmod(mode)
    }

    async fn chown(&mut self, uid: u32, gid: u32) -> Result<()> {
        self.inner.chown(uid, gid)
    }

    async fn utimes(&mut self, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.inner.utimes(atime_ms, mtime_ms)
    }

    fn buffer(&self) -> Option<&[u8]> {
        self.inner.buffer()
    }
}
