//! Read-only file systems over archive images held in memory.
//!
//! [`ZipFs`] exposes a ZIP archive and [`IsoFs`] an ISO 9660 image, with
//! Joliet and Rock Ridge extensions. Both parse their directory structures
//! from a single [`bytes::Bytes`] buffer and hand out zero-copy slices of it.
//! [`IndexFs`] serves a tree described by a JSON listing, fetching file
//! contents on demand.

mod config;
mod index;
mod iso;
mod time;
mod zip;

pub use config::{IndexFsConfig, IsoFsConfig, ZipFsConfig};
pub use index::{Fetch, IndexFs};
pub use iso::{IsoFs, VolumeKind};
pub use zip::{
    CentralDirectory, CompressionMethod, Decompressor, EndOfCentralDirectory, ZipFs,
};
