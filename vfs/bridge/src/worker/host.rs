use std::collections::HashMap;
use std::sync::Arc;

use bfs_core::{ApiError, ErrorCode, FileAsync, FileSystemAsync, Result};
use tokio::task::JoinHandle;

use super::protocol::{BackendInfo, Envelope, HostEnd, RemoteFd, Reply, Request, Response};

/// A handle opened on behalf of the client.
#[derive(Debug)]
struct HostFd {
    file: Box<dyn FileAsync>,
    /// Bytes of the client's buffer already applied by an appending handle.
    applied: usize,
}

/// Serves [`WorkerFs`](super::WorkerFs) requests against a local root file
/// system, one request at a time.
#[derive(Debug)]
pub struct WorkerHost {
    root: Arc<dyn FileSystemAsync>,
    fds: HashMap<u64, HostFd>,
    next_fd: u64,
}

impl WorkerHost {
    pub fn new(root: Arc<dyn FileSystemAsync>) -> Self {
        Self {
            root,
            fds: HashMap::new(),
            next_fd: 0,
        }
    }

    pub fn open_descriptors(&self) -> usize {
        self.fds.len()
    }

    /// Runs [`serve`](Self::serve) on the current tokio runtime.
    pub fn spawn(self, end: HostEnd) -> Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ApiError::eio("WorkerHost needs a tokio runtime to serve requests."))?;
        Ok(runtime.spawn(self.serve(end)))
    }

    /// Answers requests until the client hangs up.
    pub async fn serve(mut self, mut end: HostEnd) {
        tracing::debug!(root = %self.root.name(), "worker host listening");
        while let Some(Envelope { id, request }) = end.requests.recv().await {
            let method = request.method();
            tracing::trace!(id, method, "handling request");
            let response = self
                .handle(request)
                .await
                .unwrap_or_else(|e| Response::Err(e.to_json()));
            if end.replies.send(Reply { id, response }).await.is_err() {
                tracing::error!(id, method, "worker reply channel closed");
                return;
            }
        }
        tracing::debug!(open = self.fds.len(), "worker client disconnected");
    }

    async fn handle(&mut self, request: Request) -> Result<Response> {
        let root = self.root.clone();
        Ok(match request {
            Request::Describe => Response::Describe(BackendInfo {
                is_read_only: root.is_read_only(),
                supports_links: root.supports_links(),
                supports_props: root.supports_props(),
            }),
            Request::Rename { old_path, new_path } => {
                root.rename(&old_path, &new_path).await?;
                Response::Done
            }
            Request::Stat { path, is_lstat } => Response::Stats(root.stat(&path, is_lstat).await?),
            Request::Open { path, flag, mode } => {
                let file = root.open(&path, flag, mode).await?;
                Response::Fd(self.register(path, flag, file).await?)
            }
            Request::Unlink { path } => {
                root.unlink(&path).await?;
                Response::Done
            }
            Request::Rmdir { path } => {
                root.rmdir(&path).await?;
                Response::Done
            }
            Request::Mkdir { path, mode } => {
                root.mkdir(&path, mode).await?;
                Response::Done
            }
            Request::Readdir { path } => Response::Names(root.readdir(&path).await?),
            Request::Exists { path } => Response::Bool(root.exists(&path).await),
            Request::Realpath { path } => Response::Path(root.realpath(&path).await?),
            Request::Truncate { path, len } => {
                root.truncate(&path, len).await?;
                Response::Done
            }
            Request::ReadFile { path, flag } => Response::Data(root.read_file(&path, flag).await?),
            Request::WriteFile {
                path,
                data,
                flag,
                mode,
            } => {
                root.write_file(&path, &data, flag, mode).await?;
                Response::Done
            }
            Request::AppendFile {
                path,
                data,
                flag,
                mode,
            } => {
                root.append_file(&path, &data, flag, mode).await?;
                Response::Done
            }
            Request::Chmod {
                path,
                is_lchmod,
                mode,
            } => {
                root.chmod(&path, is_lchmod, mode).await?;
                Response::Done
            }
            Request::Chown {
                path,
                is_lchown,
                uid,
                gid,
            } => {
                root.chown(&path, is_lchown, uid, gid).await?;
                Response::Done
            }
            Request::Utimes {
                path,
                atime_ms,
                mtime_ms,
            } => {
                root.utimes(&path, atime_ms, mtime_ms).await?;
                Response::Done
            }
            Request::Link { src_path, dst_path } => {
                root.link(&src_path, &dst_path).await?;
                Response::Done
            }
            Request::Symlink {
                src_path,
                dst_path,
                kind,
            } => {
                root.symlink(&src_path, &dst_path, &kind).await?;
                Response::Done
            }
            Request::Readlink { path } => Response::Path(root.readlink(&path).await?),
            Request::Sync { fd } => {
                self.apply(fd).await?;
                Response::Done
            }
            Request::Close { id } => {
                let mut fd = self.fds.remove(&id).ok_or_else(bad_fd)?;
                fd.file.close().await?;
                Response::Done
            }
        })
    }

    /// Keeps `file` open under a new id and snapshots it for the client.
    /// Handles that cannot read ship no content, so their snapshot claims an
    /// empty file.
    async fn register(
        &mut self,
        path: String,
        flag: bfs_core::FileFlag,
        mut file: Box<dyn FileAsync>,
    ) -> Result<RemoteFd> {
        let mut stats = file.stat().await?;
        let data = if flag.is_readable() {
            let len = usize::try_from(stats.size)
                .map_err(|_| ApiError::from_code(ErrorCode::Fbig))?;
            let mut buf = vec![0u8; len];
            let n = file.read(&mut buf, Some(0)).await?;
            buf.truncate(n);
            buf
        } else {
            stats.set_size(0);
            Vec::new()
        };
        let id = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(
            id,
            HostFd {
                file,
                applied: data.len(),
            },
        );
        Ok(RemoteFd {
            id,
            path,
            flag,
            stats,
            data,
        })
    }

    /// Brings the host handle in line with the client's copy: appending
    /// handles write the bytes added since the last sync at their current
    /// position, others replace the whole content. A changed mode is applied
    /// last.
    async fn apply(&mut self, remote: RemoteFd) -> Result<()> {
        let fd = self.fds.get_mut(&remote.id).ok_or_else(bad_fd)?;
        if remote.flag.is_writeable() {
            if remote.flag.is_appendable() {
                let fresh = remote.data.get(fd.applied..).unwrap_or_default();
                let pos = fd.file.pos();
                fd.file.write(fresh, Some(pos)).await?;
                fd.applied = remote.data.len();
            } else {
                fd.file.write(&remote.data, Some(0)).await?;
                fd.file.truncate(remote.data.len() as u64).await?;
            }
            if fd.file.stat().await?.mode != remote.stats.mode {
                fd.file.chmod(remote.stats.mode).await?;
            }
        }
        fd.file.sync().await
    }
}

fn bad_fd() -> ApiError {
    ApiError::with_message(ErrorCode::Badf, "Invalid file descriptor.")
}
