//! Messages exchanged between a [`WorkerFs`](super::WorkerFs) and its host.
//!
//! Every value that crosses the channel is owned, so an open file travels
//! as a [`RemoteFd`] snapshot rather than a live handle.

use bfs_core::{FileFlag, Stats, WireError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::WorkerFsConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Request {
    Describe,
    Rename { old_path: String, new_path: String },
    Stat { path: String, is_lstat: bool },
    Open { path: String, flag: FileFlag, mode: u16 },
    Unlink { path: String },
    Rmdir { path: String },
    Mkdir { path: String, mode: u16 },
    Readdir { path: String },
    Exists { path: String },
    Realpath { path: String },
    Truncate { path: String, len: u64 },
    ReadFile { path: String, flag: FileFlag },
    WriteFile { path: String, data: Vec<u8>, flag: FileFlag, mode: u16 },
    AppendFile { path: String, data: Vec<u8>, flag: FileFlag, mode: u16 },
    Chmod { path: String, is_lchmod: bool, mode: u16 },
    Chown { path: String, is_lchown: bool, uid: u32, gid: u32 },
    Utimes { path: String, atime_ms: f64, mtime_ms: f64 },
    Link { src_path: String, dst_path: String },
    Symlink { src_path: String, dst_path: String, kind: String },
    Readlink { path: String },
    /// Applies the handed-back buffer, then syncs the host handle.
    Sync { fd: RemoteFd },
    /// Closes the host handle.
    Close { id: u64 },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Describe => "describe",
            Request::Rename { .. } => "rename",
            Request::Stat { .. } => "stat",
            Request::Open { .. } => "open",
            Request::Unlink { .. } => "unlink",
            Request::Rmdir { .. } => "rmdir",
            Request::Mkdir { .. } => "mkdir",
            Request::Readdir { .. } => "readdir",
            Request::Exists { .. } => "exists",
            Request::Realpath { .. } => "realpath",
            Request::Truncate { .. } => "truncate",
            Request::ReadFile { .. } => "readFile",
            Request::WriteFile { .. } => "writeFile",
            Request::AppendFile { .. } => "appendFile",
            Request::Chmod { .. } => "chmod",
            Request::Chown { .. } => "chown",
            Request::Utimes { .. } => "utimes",
            Request::Link { .. } => "link",
            Request::Symlink { .. } => "symlink",
            Request::Readlink { .. } => "readlink",
            Request::Sync { .. } => "sync",
            Request::Close { .. } => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Response {
    Describe(BackendInfo),
    Done,
    Stats(Stats),
    Fd(RemoteFd),
    Names(Vec<String>),
    Bool(bool),
    Path(String),
    Data(Vec<u8>),
    Err(WireError),
}

/// Capabilities of the host's root file system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub is_read_only: bool,
    pub supports_links: bool,
    pub supports_props: bool,
}

/// An open file as it crosses the channel: its identity on the host plus a
/// copy of its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFd {
    pub id: u64,
    pub path: String,
    pub flag: FileFlag,
    pub stats: Stats,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub response: Response,
}

/// The client's side of a channel pair.
#[derive(Debug)]
pub struct ClientEnd {
    pub requests: mpsc::Sender<Envelope>,
    pub replies: mpsc::Receiver<Reply>,
}

/// The host's side of a channel pair.
#[derive(Debug)]
pub struct HostEnd {
    pub requests: mpsc::Receiver<Envelope>,
    pub replies: mpsc::Sender<Reply>,
}

/// Builds connected client and host ends bounded by
/// `config.channel_capacity`.
pub fn channel(config: &WorkerFsConfig) -> bfs_core::Result<(ClientEnd, HostEnd)> {
    config.validate()?;
    let (req_tx, req_rx) = mpsc::channel(config.channel_capacity);
    let (rep_tx, rep_rx) = mpsc::channel(config.channel_capacity);
    Ok((
        ClientEnd {
            requests: req_tx,
            replies: rep_rx,
        },
        HostEnd {
            requests: req_rx,
            replies: rep_tx,
        },
    ))
}
