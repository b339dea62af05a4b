//! Read-only file system over a ZIP archive.

mod compression;
mod cp437;
mod records;

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use parking_lot::RwLock;

use bfs_core::{
    ActionType, ApiError, DiskSpace, ErrorCode, File, FileFlag, FileIndex, FileSystem,
    IndexEntry, IndexNode, NoSync, NoSyncFile, Result, Stats, path,
};

pub use compression::{CompressionMethod, Decompressor};
pub use records::{CentralDirectory, EndOfCentralDirectory};

use crate::config::ZipFsConfig;

const ZIP64_MARKER: u32 = 0xFFFF_FFFF;

/// A ZIP archive exposed as a read-only, synchronous file system.
///
/// The central directory is indexed once at construction. Entry contents
/// are decompressed on every open, with the decompressor registered for the
/// entry's method.
pub struct ZipFs {
    name: String,
    data: Bytes,
    eocd: EndOfCentralDirectory,
    index: FileIndex<CentralDirectory>,
    entries: Vec<CentralDirectory>,
    decompressors: RwLock<HashMap<u16, Decompressor>>,
}

impl ZipFs {
    pub fn new(config: ZipFsConfig) -> Result<Self> {
        config.validate()?;
        let ZipFsConfig { data, name } = config;
        let eocd = EndOfCentralDirectory::locate(&data)?;
        if eocd.disk_number() != eocd.cd_disk_number() {
            return Err(ApiError::einval("ZipFS does not support spanned zip files."));
        }
        let cd_offset = eocd.cd_offset();
        if cd_offset == ZIP64_MARKER {
            return Err(ApiError::einval("ZipFS does not support Zip64."));
        }

        let mut index = FileIndex::new();
        let mut entries = Vec::with_capacity(usize::from(eocd.cd_total_entry_count()));
        let mut ptr = cd_offset as usize;
        let end = ptr + eocd.cd_size() as usize;
        while ptr < end {
            let cd = CentralDirectory::parse(&data, ptr)?;
            ptr += cd.total_size();
            let entry_name = cd.file_name();
            if entry_name.starts_with('/') {
                return Err(ApiError::with_message(
                    ErrorCode::Perm,
                    "Unexpectedly encountered an absolute path in a zip file.",
                ));
            }
            let trimmed = entry_name.strip_suffix('/').unwrap_or(entry_name);
            if trimmed.is_empty() {
                continue;
            }
            let entry_path = path::normalize(&format!("/{trimmed}"));
            let entry = if cd.is_directory() {
                IndexEntry::dir(Some(cd.clone()))
            } else {
                IndexEntry::file(cd.clone())
            };
            if !index.add_path_fast(&entry_path, entry) {
                tracing::warn!(path = %entry_path, "zip entry conflicts with an earlier entry");
            }
            entries.push(cd);
        }

        let mut decompressors = HashMap::new();
        decompressors.insert(CompressionMethod::Stored.id(), compression::stored());
        decompressors.insert(CompressionMethod::Deflated.id(), compression::inflate());

        tracing::debug!(
            name = %name,
            entries = entries.len(),
            bytes = data.len(),
            "indexed zip archive"
        );
        Ok(Self {
            name,
            data,
            eocd,
            index,
            entries,
            decompressors: RwLock::new(decompressors),
        })
    }

    /// Installs the decompressor used for entries stored with `method`.
    pub fn register_decompressor(&self, method: CompressionMethod, decompressor: Decompressor) {
        self.decompressors.write().insert(method.id(), decompressor);
    }

    pub fn eocd(&self) -> &EndOfCentralDirectory {
        &self.eocd
    }

    /// Central directory entries in archive order.
    pub fn entries(&self) -> &[CentralDirectory] {
        &self.entries
    }

    pub fn entry(&self, path: &str) -> Result<&CentralDirectory> {
        self.node(path)?.data().ok_or_else(|| ApiError::enoent(path))
    }

    /// Decompressed contents of a file entry.
    pub fn entry_data(&self, cd: &CentralDirectory) -> Result<Vec<u8>> {
        if cd.is_encrypted() {
            return Err(ApiError::einval(format!(
                "ZipFS does not support encrypted files: '{}'",
                cd.file_name()
            )));
        }
        let method = cd.compression_method();
        let decompressor = self
            .decompressors
            .read()
            .get(&method.id())
            .cloned()
            .ok_or_else(|| {
                ApiError::einval(format!(
                    "Invalid compression method on file '{}': {method}",
                    cd.file_name()
                ))
            })?;
        let raw = cd.raw_data()?;
        decompressor(&raw, cd.uncompressed_size() as usize)
    }

    fn node(&self, path: &str) -> Result<IndexNode<'_, CentralDirectory>> {
        self.index.resolve(path)
    }
}

impl fmt::Debug for ZipFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFs")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl FileSystem for ZipFs {
    fn name(&self) -> String {
        if self.name.is_empty() {
            "ZipFS".to_owned()
        } else {
            format!("ZipFS:{}", self.name)
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn supports_links(&self) -> bool {
        false
    }

    fn supports_props(&self) -> bool {
        false
    }

    fn disk_space(&self, _path: &str) -> DiskSpace {
        DiskSpace {
            total: self.data.len() as u64,
            free: 0,
        }
    }

    fn stat(&self, path: &str, _is_lstat: bool) -> Result<Stats> {
        Ok(match self.node(path)? {
            IndexNode::File(file) => file.data().stats(),
            IndexNode::Dir(dir) => dir.data().map_or_else(|| dir.stats(), CentralDirectory::stats),
        })
    }

    fn open(&self, path: &str, flag: FileFlag, _mode: u16) -> Result<Box<dyn File>> {
        if flag.is_writeable() {
            return Err(ApiError::eperm(path));
        }
        let cd = match self.node(path)? {
            IndexNode::File(file) => file.data(),
            IndexNode::Dir(_) => return Err(ApiError::eisdir(path)),
        };
        match flag.path_exists_action() {
            ActionType::ThrowException | ActionType::TruncateFile => Err(ApiError::eexist(path)),
            ActionType::Nop => {
                let contents = self.entry_data(cd)?;
                let file = NoSyncFile::new(NoSync, path, flag, cd.stats(), contents)?;
                Ok(Box::new(file))
            }
            ActionType::CreateFile => Err(ApiError::einval("Invalid FileFlag object.")),
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.node(path)? {
            IndexNode::Dir(dir) => Ok(dir.listing()),
            IndexNode::File(_) => Err(ApiError::enotdir(path)),
        }
    }
}
