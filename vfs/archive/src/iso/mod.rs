//! Read-only file system over an ISO 9660 image.

mod descriptor;
mod record;
mod susp;
mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use bfs_core::{
    ActionType, ApiError, DiskSpace, File, FileFlag, FileSystem, MAX_SYMLINK_HOPS, NoSync,
    NoSyncFile, Result, Stats, path,
};

pub use descriptor::VolumeKind;

use self::descriptor::VolumeDescriptor;
use self::record::{Directory, DirectoryRecord};
use crate::config::IsoFsConfig;

pub(crate) const SECTOR_SIZE: usize = 2048;

/// An ISO 9660 image exposed as a read-only, synchronous file system.
///
/// Joliet names are used when the image has a Joliet descriptor. Rock Ridge
/// extensions are detected from the root directory when the file system is
/// built; when present they supply names, modes, timestamps and symbolic
/// links. Directories are parsed on first use and kept.
pub struct IsoFs {
    name: String,
    data: Bytes,
    volume: VolumeDescriptor,
    root: DirectoryRecord,
    /// Parsed directories keyed by their resolved extent.
    directories: Mutex<HashMap<(usize, Option<usize>), Arc<Directory>>>,
}

impl IsoFs {
    pub fn new(config: IsoFsConfig) -> Result<Self> {
        config.validate()?;
        let IsoFsConfig { data, name } = config;
        let volume = VolumeDescriptor::select(&data)?;
        let root =
            DirectoryRecord::parse(&data, volume.root_record_offset(), volume.encoding(), None)?;
        let dot = DirectoryRecord::parse(&data, root.lba(), volume.encoding(), None)?;
        let rock_ridge = dot.rock_ridge_offset(&data);
        let root = root.with_rock_ridge(rock_ridge);
        tracing::debug!(
            name = %name,
            volume = %volume.kind(),
            rock_ridge = rock_ridge.is_some(),
            bytes = data.len(),
            "opened iso image"
        );
        Ok(Self {
            name,
            data,
            volume,
            root,
            directories: Mutex::new(HashMap::new()),
        })
    }

    pub fn volume_kind(&self) -> VolumeKind {
        self.volume.kind()
    }

    pub fn volume_identifier(&self) -> String {
        self.volume.volume_identifier()
    }

    /// Volume size in logical blocks.
    pub fn volume_space_size(&self) -> u32 {
        self.volume.volume_space_size()
    }

    pub fn volume_creation_ms(&self) -> Option<f64> {
        self.volume.volume_creation_ms()
    }

    pub fn has_rock_ridge(&self) -> bool {
        self.root.has_rock_ridge()
    }

    fn directory(&self, record: &DirectoryRecord) -> Result<Arc<Directory>> {
        let key = Directory::extent(record, &self.data)?;
        if let Some(dir) = self.directories.lock().get(&key) {
            return Ok(dir.clone());
        }
        let dir = Arc::new(Directory::parse(record, &self.data)?);
        self.directories.lock().insert(key, dir.clone());
        Ok(dir)
    }

    /// Finds the record named by `path`, following symbolic links met on
    /// the way but not a link in the final position.
    fn lookup(&self, path: &str, hops: &mut usize) -> Result<Option<(String, DirectoryRecord)>> {
        let mut current = ("/".to_owned(), self.root.clone());
        for segment in path::segments(path) {
            let Some((dir_path, dir)) = self.follow(current, hops)? else {
                return Ok(None);
            };
            if !dir.is_directory(&self.data) {
                return Ok(None);
            }
            let Some(child) = self.directory(&dir)?.get(segment).cloned() else {
                return Ok(None);
            };
            current = (path::join(&dir_path, segment), child);
        }
        Ok(Some(current))
    }

    /// Resolves a chain of symbolic links. Targets are relative to the
    /// directory holding the link.
    fn follow(
        &self,
        (mut path, mut record): (String, DirectoryRecord),
        hops: &mut usize,
    ) -> Result<Option<(String, DirectoryRecord)>> {
        while let Some(target) = record.symlink_target(&self.data) {
            *hops += 1;
            if *hops > MAX_SYMLINK_HOPS {
                return Err(ApiError::einval(format!(
                    "Too many symbolic links encountered resolving '{path}'."
                )));
            }
            let resolved = path::resolve(path::dirname(&path), &target);
            match self.lookup(&resolved, hops)? {
                Some(next) => (path, record) = next,
                None => return Ok(None),
            }
        }
        Ok(Some((path, record)))
    }

    fn resolve(&self, path: &str) -> Result<DirectoryRecord> {
        let mut hops = 0;
        let found = self.lookup(path, &mut hops)?;
        let resolved = match found {
            Some(found) => self.follow(found, &mut hops)?,
            None => None,
        };
        resolved
            .map(|(_, record)| record)
            .ok_or_else(|| ApiError::enoent(path))
    }
}

impl fmt::Debug for IsoFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsoFs")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("volume", &self.volume)
            .field("rock_ridge", &self.has_rock_ridge())
            .finish()
    }
}

impl FileSystem for IsoFs {
    fn name(&self) -> String {
        let mut name = String::from("IsoFS");
        if !self.name.is_empty() {
            name.push(':');
            name.push_str(&self.name);
        }
        name.push('-');
        name.push_str(&self.volume.kind().to_string());
        if self.has_rock_ridge() {
            name.push_str("-RockRidge");
        }
        name
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn supports_links(&self) -> bool {
        true
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

    fn stat(&self, path: &str, is_lstat: bool) -> Result<Stats> {
        if is_lstat {
            let mut hops = 0;
            let (_, record) = self
                .lookup(path, &mut hops)?
                .ok_or_else(|| ApiError::enoent(path))?;
            if let Some(target) = record.symlink_target(&self.data) {
                return Ok(record.link_stats(&self.data, &target));
            }
            return Ok(record.stats(&self.data));
        }
        Ok(self.resolve(path)?.stats(&self.data))
    }

    fn open(&self, path: &str, flag: FileFlag, _mode: u16) -> Result<Box<dyn File>> {
        if flag.is_writeable() {
            return Err(ApiError::eperm(path));
        }
        let record = self.resolve(path)?;
        if record.is_directory(&self.data) {
            return Err(ApiError::eisdir(path));
        }
        match flag.path_exists_action() {
            ActionType::ThrowException | ActionType::TruncateFile => Err(ApiError::eexist(path)),
            ActionType::Nop => {
                let contents = record.contents(&self.data)?.to_vec();
                let file =
                    NoSyncFile::new(NoSync, path, flag, record.stats(&self.data), contents)?;
                Ok(Box::new(file))
            }
            ActionType::CreateFile => Err(ApiError::einval("Invalid FileFlag object.")),
        }
    }

    fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let record = self.resolve(path)?;
        if !record.is_directory(&self.data) {
            return Err(ApiError::enotdir(path));
        }
        Ok(self.directory(&record)?.names())
    }

    fn readlink(&self, path: &str) -> Result<String> {
        let mut hops = 0;
        let (_, record) = self
            .lookup(path, &mut hops)?
            .ok_or_else(|| ApiError::enoent(path))?;
        record
            .symlink_target(&self.data)
            .ok_or_else(|| ApiError::einval(format!("'{path}' is not a symbolic link.")))
    }
}
