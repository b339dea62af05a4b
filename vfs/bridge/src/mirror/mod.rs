//! A synchronous mirror replicated to an asynchronous store.
//!
//! Every call is answered by the mirror. Mutations are applied to the
//! mirror first and then queued, in issue order, for a single background
//! task that replays them against the backing store. The first replay
//! failure leaves the two stores inconsistent: it is stored and returned by
//! every later call and by [`AsyncMirror::flush`].

mod queue;

use std::sync::Arc;

use bfs_core::{
    ApiError, DiskSpace, File, FileFlag, FileSystem, FileSystemAsync, PreloadFile, Result, Stats,
    SyncBacking, path,
};
use futures::future::try_join_all;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{mpsc, oneshot};

pub use queue::Operation;
use queue::{Command, Fatal};

use crate::config::AsyncMirrorConfig;

#[derive(Debug)]
struct Shared {
    sync: Arc<dyn FileSystem>,
    backing_supports_props: bool,
    queue: mpsc::UnboundedSender<Command>,
    fatal: Fatal,
}

impl Shared {
    fn check(&self) -> Result<()> {
        match self.fatal.read().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn closed(&self) -> ApiError {
        self.fatal
            .read()
            .clone()
            .unwrap_or_else(|| ApiError::eio("The AsyncMirror replication queue is closed."))
    }

    fn enqueue(&self, op: Operation) -> Result<()> {
        self.queue
            .send(Command::Apply(op))
            .map_err(|_| self.closed())
    }

    /// Queues the mirror's current content of `p`.
    fn replicate_file(&self, p: &str) -> Result<()> {
        let mode = self.sync.stat(p, false)?.permissions();
        let data = self.sync.read_file(p, FileFlag::Read)?;
        self.enqueue(Operation::WriteFile {
            path: p.to_owned(),
            data,
            mode,
        })
    }
}

/// Persists a [`MirrorFile`] into the mirror and queues the same write.
pub struct MirrorBacking {
    shared: Arc<Shared>,
}

impl SyncBacking for MirrorBacking {
    fn supports_props(&self) -> bool {
        self.shared.sync.supports_props() && self.shared.backing_supports_props
    }

    fn sync_file(&self, p: &str, data: &[u8], stats: &Stats) -> Result<()> {
        let shared = &self.shared;
        shared.check()?;
        let mode = stats.permissions();
        shared.sync.write_file(p, data, FileFlag::Write, mode)?;
        shared.enqueue(Operation::WriteFile {
            path: p.to_owned(),
            data: data.to_vec(),
            mode,
        })?;
        if shared.sync.stat(p, false)?.permissions() != mode {
            shared.sync.chmod(p, false, mode)?;
            shared.enqueue(Operation::Chmod {
                path: p.to_owned(),
                is_lchmod: false,
                mode,
            })?;
        }
        Ok(())
    }
}

pub type MirrorFile = PreloadFile<MirrorBacking>;

#[derive(Debug, Clone)]
pub struct AsyncMirror {
    shared: Arc<Shared>,
}

impl AsyncMirror {
    pub const NAME: &'static str = "AsyncMirror";

    /// Validates `config`, copies the backing store into the mirror when
    /// `populate` is set, and starts the replay task on the current tokio
    /// runtime.
    pub async fn new(config: AsyncMirrorConfig) -> Result<Self> {
        config.validate()?;
        let runtime = RuntimeHandle::try_current()
            .map_err(|_| ApiError::eio("AsyncMirror needs a tokio runtime to replicate writes."))?;
        if config.populate {
            populate(config.backing.as_ref(), config.sync.as_ref()).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let fatal = Fatal::default();
        runtime.spawn(queue::replay(config.backing.clone(), rx, fatal.clone()));
        tracing::debug!(
            mirror = %config.sync.name(),
            backing = %config.backing.name(),
            "initialized async mirror",
        );
        Ok(Self {
            shared: Arc::new(Shared {
                backing_supports_props: config.backing.supports_props(),
                sync: config.sync,
                queue: tx,
                fatal,
            }),
        })
    }

    /// Resolves once every mutation issued so far has reached the backing
    /// store.
    pub async fn flush(&self) -> Result<()> {
        self.shared.check()?;
        let (tx, rx) = oneshot::channel();
        self.shared
            .queue
            .send(Command::Flush(tx))
            .map_err(|_| self.shared.closed())?;
        rx.await.map_err(|_| self.shared.closed())
    }

    pub fn mirror(&self) -> &Arc<dyn FileSystem> {
        &self.shared.sync
    }

    /// The replay failure that stopped replication, if any.
    pub fn desync_error(&self) -> Option<ApiError> {
        self.shared.fatal.read().clone()
    }

    fn mutate(
        &self,
        op: Operation,
        apply: impl FnOnce(&dyn FileSystem) -> Result<()>,
    ) -> Result<()> {
        self.shared.check()?;
        apply(self.shared.sync.as_ref())?;
        self.shared.enqueue(op)
    }
}

async fn populate(backing: &dyn FileSystemAsync, sync: &dyn FileSystem) -> Result<()> {
    let mut pending = vec!["/".to_owned()];
    let mut copied = 0usize;
    while let Some(dir) = pending.pop() {
        let children: Vec<String> = backing
            .readdir(&dir)
            .await?
            .iter()
            .map(|name| path::join(&dir, name))
            .collect();
        let stats = try_join_all(children.iter().map(|c| backing.stat(c, false))).await?;
        for (child, stats) in children.into_iter().zip(stats) {
            if stats.is_directory() {
                if !sync.exists(&child) {
                    sync.mkdir(&child, stats.permissions())?;
                }
                pending.push(child);
            } else {
                let data = backing.read_file(&child, FileFlag::Read).await?;
                sync.write_file(&child, &data, FileFlag::Write, stats.permissions())?;
            }
            copied += 1;
        }
    }
    tracing::debug!(entries = copied, "populated async mirror");
    Ok(())
}

impl FileSystem for AsyncMirror {
    fn name(&self) -> String {
        Self::NAME.to_owned()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        self.shared.sync.supports_props() && self.shared.backing_supports_props
    }

    fn disk_space(&self, p: &str) -> DiskSpace {
        self.shared.sync.disk_space(p)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let op = Operation::Rename {
            old_path: old_path.to_owned(),
            new_path: new_path.to_owned(),
        };
        self.mutate(op, |fs| fs.rename(old_path, new_path))
    }

    fn stat(&self, p: &str, is_lstat: bool) -> Result<Stats> {
        self.shared.check()?;
        self.shared.sync.stat(p, is_lstat)
    }

    /// Opens the file in the mirror and hands out a buffered copy that
    /// replicates itself when synced.
    fn open(&self, p: &str, flag: FileFlag, mode: u16) -> Result<Box<dyn File>> {
        let shared = &self.shared;
        shared.check()?;
        let existed = shared.sync.exists(p);
        shared.sync.open(p, flag, mode)?.close()?;
        if !existed || flag.is_truncating() {
            shared.replicate_file(p)?;
        }
        let stats = shared.sync.stat(p, false)?;
        let contents = shared.sync.read_file(p, FileFlag::Read)?;
        let backing = MirrorBacking {
            shared: shared.clone(),
        };
        Ok(Box::new(PreloadFile::new(backing, p, flag, stats, contents)?))
    }

    fn unlink(&self, p: &str) -> Result<()> {
        let op = Operation::Unlink { path: p.to_owned() };
        self.mutate(op, |fs| fs.unlink(p))
    }

    fn rmdir(&self, p: &str) -> Result<()> {
        let op = Operation::Rmdir { path: p.to_owned() };
        self.mutate(op, |fs| fs.rmdir(p))
    }

    fn mkdir(&self, p: &str, mode: u16) -> Result<()> {
        let op = Operation::Mkdir {
            path: p.to_owned(),
            mode,
        };
        self.mutate(op, |fs| fs.mkdir(p, mode))
    }

    fn readdir(&self, p: &str) -> Result<Vec<String>> {
        self.shared.check()?;
        self.shared.sync.readdir(p)
    }

    fn exists(&self, p: &str) -> bool {
        self.shared.check().is_ok() && self.shared.sync.exists(p)
    }

    fn realpath(&self, p: &str) -> Result<String> {
        self.shared.check()?;
        self.shared.sync.realpath(p)
    }

    fn truncate(&self, p: &str, len: u64) -> Result<()> {
        self.shared.check()?;
        self.shared.sync.truncate(p, len)?;
        self.shared.replicate_file(p)
    }

    fn read_file(&self, p: &str, flag: FileFlag) -> Result<Vec<u8>> {
        self.shared.check()?;
        self.shared.sync.read_file(p, flag)
    }

    fn write_file(&self, p: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.shared.check()?;
        self.shared.sync.write_file(p, data, flag, mode)?;
        self.shared.replicate_file(p)
    }

    fn append_file(&self, p: &str, data: &[u8], flag: FileFlag, mode: u16) -> Result<()> {
        self.shared.check()?;
        self.shared.sync.append_file(p, data, flag, mode)?;
        self.shared.replicate_file(p)
    }

    fn chmod(&self, p: &str, is_lchmod: bool, mode: u16) -> Result<()> {
        let op = Operation::Chmod {
            path: p.to_owned(),
            is_lchmod,
            mode,
        };
        self.mutate(op, |fs| fs.chmod(p, is_lchmod, mode))
    }

    fn chown(&self, p: &str, is_lchown: bool, uid: u32, gid: u32) -> Result<()> {
        let op = Operation::Chown {
            path: p.to_owned(),
            is_lchown,
            uid,
            gid,
        };
        self.mutate(op, |fs| fs.chown(p, is_lchown, uid, gid))
    }

    fn utimes(&self, p: &str, atime_ms: f64, mtime_ms: f64) -> Result<()> {
        let op = Operation::Utimes {
            path: p.to_owned(),
            atime_ms,
            mtime_ms,
        };
        self.mutate(op, |fs| fs.utimes(p, atime_ms, mtime_ms))
    }
}
