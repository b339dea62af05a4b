use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bfs_core::{
    ApiError, AsyncBacking, FileAsync, FileFlag, FileSystemAsync, PreloadFile, Result, Stats,
};
use parking_lot::Mutex;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{BackendInfo, ClientEnd, Envelope, RemoteFd, Reply, Request, Response};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

struct RpcClient {
    requests: mpsc::Sender<Envelope>,
    pending: Pending,
    request_seed: AtomicU64,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

fn channel_closed() -> ApiError {
    ApiError::eio("The WorkerFS channel closed before the call completed.")
}

fn unexpected(method: &str) -> ApiError {
    ApiError::eio(format!("Unexpected response to {method} from the worker."))
}

impl RpcClient {
    async fn call(&self, request: Request) -> Result<Response> {
        let id = self.request_seed.fetch_add(1, Ordering::SeqCst);
        let method = request.method();
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().insert(id, tx);
            rx
        };
        tracing::trace!(id, method, "sending request");
        if self.requests.send(Envelope { id, request }).await.is_err() {
            self.pending.lock().remove(&id);
            tracing::error!(id, method, "worker request channel closed");
            return Err(channel_closed());
        }
        match rx.await {
            Ok(Response::Err(e)) => Err(ApiError::from_json(e)),
            Ok(response) => Ok(response),
            Err(_) => Err(channel_closed()),
        }
    }

    async fn done(&self, request: Request) -> Result<()> {
        let method = request.method();
        match self.call(request).await? {
            Response::Done => Ok(()),
            _ => Err(unexpected(method)),
        }
    }
}

/// Routes replies to the call waiting on their id. When the channel closes
/// every pending call is dropped, which fails it with `EIO`.
async fn dispatch_replies(mut replies: mpsc::Receiver<Reply>, pending: Pending) {
    while let Some(Reply { id, response }) = replies.recv().await {
        let waiting = pending.lock().remove(&id);
        match waiting {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::warn!(id, "reply for an unknown request"),
        }
    }
    let dropped = {
        let mut pending = pending.lock();
        let n = pending.len();
        pending.clear();
        n
    };
    tracing::error!(pending = dropped, "worker reply channel closed");
}

/// A file system whose calls run on a [`WorkerHost`](super::WorkerHost) at
/// the other end of a channel. Only the asynchronous surface is available.
#[derive(Debug, Clone)]
pub struct WorkerFs {
    client: Arc<RpcClient>,
    info: BackendInfo,
}

impl WorkerFs {
    pub const NAME: &'static str = "WorkerFS";

    /// Starts routing replies from `end` and asks the host for its root's
    /// capabilities.
    pub async fn connect(end: ClientEnd) -> Result<Self> {
        let runtime = RuntimeHandle::try_current()
            .map_err(|_| ApiError::eio("WorkerFS needs a tokio runtime to receive replies."))?;
        let pending = Pending::default();
        runtime.spawn(dispatch_replies(end.replies, pending.clone()));
        let client = Arc::new(RpcClient {
            requests: end.requests,
            pending,
            request_seed: AtomicU64::new(1),
        });
        let info = match client.call(Request::Describe).await? {
            Response::Describe(info) => info,
            _ => return Err(unexpected("describe")),
        };
        tracing::debug!(
            read_only = info.is_read_only,
            links = info.supports_links,
            props = info.supports_props,
            "connected to worker host",
        );
        Ok(Self { client, info })
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.info
    }

    async fn file_data(&self, request: Request) -> Result<Vec<u8>> {
        let method = request.method();
        match self.client.call(request).await? {
            Response::Data(data) => Ok(data),
            _ => Err(unexpected(method)),
        }
    }

    async fn path(&self, request: Request) -> Result<String> {
        let method = request.method();
        match self.client.call(request).await? {
            Response::Path(p) => Ok(p),
            _ => Err(unexpected(method)),
        }
    }
}

/// Sends a [`WorkerFile`]'s buffer back to the host when it is synced.
pub struct RemoteBacking {
    client: Arc<RpcClient>,
    id: u64,
    flag: FileFlag,
    supports_props: bool,
}

#[async_trait]
impl AsyncBacking for RemoteBacking {
    fn supports_props(&self) -> bool {
        self.supports_props
    }

    async fn sync_file(&self, path: &str, data: &[u8], stats: &Stats) -> Result<()> {
        let fd = RemoteFd {
            id: self.id,
            path: path.to_owned(),
            flag: self.flag,
            stats: stats.clone(),
            data: data.to_vec(),
        };
        self.client.done(Request::Sync { fd }).await
    }

    async fn release(&self, _path: &str) -> Result<()> {
        self.client.done(Request::Close { id: self.id }).await
    }
}

/// An open file on the host, buffered on this side.
pub type WorkerFile = PreloadFile<RemoteBacking>;

#[async_trait]
impl FileSystemAsync for WorkerFs {
    fn name(&self) -> String {
        Self::NAME.to_owned()
    }

    fn is_read_only(&self) -> bool {
        self.info.is_read_only
    }

    fn supports_links(&self) -> bool {
        self.info.supports_links
    }

    fn supports_props(&self) -> bool {
        self.info.supports_props
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.client
            .done(Request::Rename {
                old_path: old_path.to_owned(),
                new_path: new_path.to_owned(),
            })
            .await
    }

    async fn stat(&self, path: &str, is_lstat: bool) -> Result<Stats> {
        let request = Request::Stat {
            path: path.to_owned(),
            is_lstat,
        };
        match self.client.call(request).await? {
            Response::Stats(stats) => Ok(stats),
            _ => Err(unexpected("stat")),
        }
    }

    async fn open(&self, path: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn FileAsync>> {
        let request = Request::Open {
            path: path.to_owned(),
            flag,
            mode,
        };
        let fd = match self.client.call(request).await? {
            Response::Fd(fd) => fd,
            _ => return Err(unexpected("open")),
        };
        let backing = RemoteBacking {
            client: self.client.clone(),
            id: fd.id,
            flag: fd.flag,
            supports_props: self.info.supports_props,
        };
        let file: WorkerFile = PreloadFile::new(backing, fd.path, fd.flag, fd.stats, fd.data)?;
        Ok(Box::new(file))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.client
            .done(Request::Unlink {
                path: path.to_owned(),
            })
            .await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.client
            .done(Request::Rmdir {
                path: path.to_owned(),
            })
            .await
    }

    async fn mkdir(&self, path: &str, mode: u16) -> Result<()> {
        self.client
            .done(Request::Mkdir {
                path: path.to_owned(),
                mode,
            })
            .await
    }

    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let request = Request::Readdir {
            path: path.to_owned(),
        };
        match self.client.call(request).await? {
            Response::Names(names) => Ok(names),
            _ => Err(unexpected("readdir")),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        let request = Request::Exists {
            path: path.to_owned(),
        };
        matches!(self.client.call(request).await, Ok(Response::Bool(true)))
    }

    async fn realpath(&self, path: &str) -> Result<String> {
        self.path(Request::Realpath {
            path: path.to_owned(),
        })
        .await
    }

    async fn truncate(&self, path: &str, len: u64) -> Result<()> {
        self.client
            .done(Request::Truncate {
                path: path.to_owned(),
                len,
            })
            .await
    }

    async fn read_file(&self, path: &str, flag: FileFlag) -> Result<Vec<u8>> {
        self.file_data(Request::ReadFile {
            path: path.to_owned(),
            flag,
        })
        .await
    }

    async fn write_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.client
            .done(Request::WriteFile {
                path: path.to_owned(),
                data: data.to_vec(),
                flag,
                mode,
            })
            .await
    }

    async fn append_file(&self, path: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.client
            .done(Request::AppendFile {
                path: path.to_owned(),
                data: data.to_vec(),
                flag,
                mode,
            })
            .await
    }

    async fn chmod(&self, path: &str, is_lchmod: bool, mode: u16) -> Result<()> {
        self.client
            .done(Request::Chmod {
                path: path.to_owned(),
                is_lchmod,
                mode,
            })
            .await
    }

    async fn chown(&self, path: &str, is_lchown: bool, uid: u32, gid: u32) -> Result<()> {
        self.client
            .done(Request::Chown {
                path: path.to_owned(),
                is_lchown,
                uid,
                gid,
            })
            .await
    }

    async fn utimes(&self, path: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        self.client
            .done(Request::Utimes {
                path: path.to_owned(),
                atime_ms,
                mtime_ms,
            })
            .await
    }

    async fn link(&self, src_path: &str, dst_path: &str) -> Result<()> {
        self.client
            .done(Request::Link {
                src_path: src_path.to_owned(),
                dst_path: dst_path.to_owned(),
            })
            .await
    }

    async fn symlink(&self, src_path: &str, dst_path: &str, kind: &str) -> Result<()> {
        self.client
            .done(Request::Symlink {
                src_path: src_path.to_owned(),
                dst_path: dst_path.to_owned(),
                kind: kind.to_owned(),
            })
            .await
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        self.path(Request::Readlink {
            path: path.to_owned(),
        })
        .await
    }
}
