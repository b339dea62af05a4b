//! Descriptor table.
//!
//! A descriptor owns one open handle. Handles opened through a synchronous
//! backend sit behind a `parking_lot` mutex and serve both surfaces;
//! handles from an asynchronous backend sit behind a `tokio` mutex so the
//! lock can be held across the backend's awaits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bfs_core::{ApiError, ErrorCode, File, FileAsync, Result};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

pub type Fd = u32;

#[derive(Debug, Clone)]
pub(crate) enum Handle {
    Sync(Arc<Mutex<Box<dyn File>>>),
    Async(Arc<AsyncMutex<Box<dyn FileAsync>>>),
}

#[derive(Debug, Clone)]
pub(crate) struct OpenFile {
    pub(crate) path: String,
    pub(crate) handle: Handle,
    dirty: Arc<AtomicBool>,
}

impl OpenFile {
    pub(crate) fn sync(path: String, file: Box<dyn File>) -> Self {
        Self::new(path, Handle::Sync(Arc::new(Mutex::new(file))))
    }

    pub(crate) fn asynchronous(path: String, file: Box<dyn FileAsync>) -> Self {
        Self::new(path, Handle::Async(Arc::new(AsyncMutex::new(file))))
    }

    fn new(path: String, handle: Handle) -> Self {
        Self {
            path,
            handle,
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Records that the handle holds changes watchers have not been told
    /// about.
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The synchronous handle, or ENOTSUP when the descriptor came from an
    /// asynchronous backend.
    pub(crate) fn sync_handle(&self) -> Result<&Arc<Mutex<Box<dyn File>>>> {
        match &self.handle {
            Handle::Sync(h) => Ok(h),
            Handle::Async(_) => Err(ApiError::enotsup()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FdTable {
    next: Fd,
    files: HashMap<Fd, OpenFile>,
}

impl FdTable {
    pub(crate) fn new(first_fd: Fd) -> Self {
        Self {
            next: first_fd,
            files: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, file: OpenFile) -> Result<Fd> {
        let fd = self.next;
        self.next = fd
            .checked_add(1)
            .ok_or_else(|| ApiError::with_message(ErrorCode::Io, "Out of file descriptors."))?;
        self.files.insert(fd, file);
        Ok(fd)
    }

    pub(crate) fn get(&self, fd: Fd) -> Result<OpenFile> {
        self.files.get(&fd).cloned().ok_or_else(invalid_fd)
    }

    pub(crate) fn remove(&mut self, fd: Fd) -> Result<OpenFile> {
        self.files.remove(&fd).ok_or_else(invalid_fd)
    }

    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }
}

fn invalid_fd() -> ApiError {
    ApiError::with_message(ErrorCode::Badf, "Invalid file descriptor.")
}
