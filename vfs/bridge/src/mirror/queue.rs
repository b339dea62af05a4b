//! The replication queue between the mirror and the backing store.

use std::sync::Arc;

use bfs_core::{ApiError, FileFlag, FileSystemAsync, Result};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

/// A mutation already applied to the mirror, waiting to be replayed.
#[derive(Clone, PartialEq)]
pub enum Operation {
    Rename { old_path: String, new_path: String },
    Unlink { path: String },
    Rmdir { path: String },
    Mkdir { path: String, mode: u16 },
    WriteFile { path: String, data: Vec<u8>, mode: u16 },
    Chmod { path: String, is_lchmod: bool, mode: u16 },
    Chown { path: String, is_lchown: bool, uid: u32, gid: u32 },
    Utimes { path: String, atime_ms: f64, mtime_ms: f64 },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Rename { .. } => "rename",
            Operation::Unlink { .. } => "unlink",
            Operation::Rmdir { .. } => "rmdir",
            Operation::Mkdir { .. } => "mkdir",
            Operation::WriteFile { .. } => "writeFile",
            Operation::Chmod { .. } => "chmod",
            Operation::Chown { .. } => "chown",
            Operation::Utimes { .. } => "utimes",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Operation::Rename { old_path, .. } => old_path,
            Operation::Unlink { path }
            | Operation::Rmdir { path }
            | Operation::Mkdir { path, .. }
            | Operation::WriteFile { path, .. }
            | Operation::Chmod { path, .. }
            | Operation::Chown { path, .. }
            | Operation::Utimes { path, .. } => path,
        }
    }

    async fn apply(&self, backing: &dyn FileSystemAsync) -> Result<()> {
        match self {
            Operation::Rename { old_path, new_path } => backing.rename(old_path, new_path).await,
            Operation::Unlink { path } => backing.unlink(path).await,
            Operation::Rmdir { path } => backing.rmdir(path).await,
            Operation::Mkdir { path, mode } => backing.mkdir(path, *mode).await,
            Operation::WriteFile { path, data, mode } => {
                backing.write_file(path, data, FileFlag::Write, *mode).await
            }
            Operation::Chmod {
                path,
                is_lchmod,
                mode,
            } => backing.chmod(path, *is_lchmod, *mode).await,
            Operation::Chown {
                path,
                is_lchown,
                uid,
                gid,
            } => backing.chown(path, *is_lchown, *uid, *gid).await,
            Operation::Utimes {
                path,
                atime_ms,
                mtime_ms,
            } => backing.utimes(path, *atime_ms, *mtime_ms).await,
        }
    }
}

// File contents stay out of logs.
impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name())
            .field("path", &self.path())
            .finish()
    }
}

pub(crate) enum Command {
    Apply(Operation),
    /// Answered once every earlier command has been replayed.
    Flush(oneshot::Sender<()>),
}

/// First replay failure; once set the mirror refuses all further work.
pub(crate) type Fatal = Arc<RwLock<Option<ApiError>>>;

/// Replays commands one at a time until the queue closes or an operation
/// fails. A failure is stored in `fatal` and ends the task, which drops any
/// pending flush.
pub(crate) async fn replay(
    backing: Arc<dyn FileSystemAsync>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    fatal: Fatal,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Apply(op) => {
                tracing::trace!(op = op.name(), path = op.path(), "replaying");
                if let Err(e) = op.apply(backing.as_ref()).await {
                    tracing::error!(
                        op = op.name(),
                        path = op.path(),
                        error = %e,
                        "async mirror desynchronized from its backing store",
                    );
                    *fatal.write() = Some(ApiError::eio(format!(
                        "File system has desynchronized. Received following error: {e}"
                    )));
                    return;
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("async mirror queue closed");
}
