//! Adapters that compose bfs backends or move them behind a channel.
//!
//! [`AsyncMirror`] serves every call from a fast synchronous mirror and
//! replicates mutations, in order, to a slower asynchronous store.
//! [`WorkerFs`] forwards calls over a message channel to a [`WorkerHost`]
//! running next to the real root file system. [`OverlayFs`] makes a
//! read-only file system writable by layering a writable one on top.

mod config;
mod mirror;
mod overlay;
mod worker;

pub use config::{AsyncMirrorConfig, DEFAULT_CHANNEL_CAPACITY, OverlayFsConfig, WorkerFsConfig};
pub use mirror::{AsyncMirror, MirrorBacking, MirrorFile, Operation};
pub use overlay::{DELETION_LOG_PATH, OverlayBacking, OverlayFile, OverlayFs};
pub use worker::{
    BackendInfo, ClientEnd, Envelope, HostEnd, RemoteBacking, RemoteFd, Reply, Request, Response,
    WorkerFile, WorkerFs, WorkerHost, channel,
};
