//! A file system served across a channel.
//!
//! [`WorkerFs`] turns every call into a [`Request`] tagged with a
//! correlation id and waits for the matching [`Reply`] from a
//! [`WorkerHost`], which runs the call against its own root. Open files are
//! handed over by value: the client buffers the content it received and
//! ships the whole buffer back when the file is synced.

mod client;
mod host;
mod protocol;

pub use client::{RemoteBacking, WorkerFile, WorkerFs};
pub use host::WorkerHost;
pub use protocol::{
    BackendInfo, ClientEnd, Envelope, HostEnd, RemoteFd, Reply, Request, Response, channel,
};
