use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Mask selecting the type nibble of a mode.
pub const TYPE_MASK: u16 = 0xF000;
/// Mask selecting the permission bits of a mode.
pub const PERMISSION_MASK: u16 = 0x0FFF;

/// Default permissions for newly created files (`0o644`).
pub const DEFAULT_FILE_MODE: u16 = 0o644;
/// Default permissions for newly created directories (`0o777`).
pub const DEFAULT_DIR_MODE: u16 = 0o777;
/// Permissions reported by read-only backends (`0o555`).
pub const READ_ONLY_MODE: u16 = 0o555;
/// Largest file size an inode can record.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum FileType {
    File = 0x8000,
    Directory = 0x4000,
    Symlink = 0xA000,
}

impl FileType {
    #[inline]
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Extracts the type from the high nibble of a mode, if it encodes one.
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & TYPE_MASK {
            0x8000 => Some(FileType::File),
            0x4000 => Some(FileType::Directory),
            0xA000 => Some(FileType::Symlink),
            _ => None,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Node-style file metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub dev: u64,
    pub ino: u64,
    pub mode: u16,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_ms: f64,
    pub mtime_ms: f64,
    pub ctime_ms: f64,
    pub birthtime_ms: f64,
}

impl Stats {
    /// Creates stats for `file_type`. Without `mode`, files get `0o644` and
    /// everything else `0o777`. All timestamps are set to now.
    pub fn new(file_type: FileType, size: u64, mode: Option<u16>) -> Self {
        let perms = mode.unwrap_or(match file_type {
            FileType::File => DEFAULT_FILE_MODE,
            _ => DEFAULT_DIR_MODE,
        });
        let now = now_ms();
        Self {
            dev: 0,
            ino: 0,
            mode: (perms & PERMISSION_MASK) | file_type.bits(),
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            size,
            blksize: 4096,
            blocks: size.div_ceil(512),
            atime_ms: now,
            mtime_ms: now,
            ctime_ms: now,
            birthtime_ms: now,
        }
    }

    pub fn with_times(mut self, atime_ms: f64, mtime_ms: f64, ctime_ms: f64) -> Self {
        self.atime_ms = atime_ms;
        self.mtime_ms = mtime_ms;
        self.ctime_ms = ctime_ms;
        self.birthtime_ms = ctime_ms;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Type encoded in the mode. A mode without a recognised type nibble is
    /// reported as a regular file.
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode).unwrap_or(FileType::File)
    }

    pub fn is_file(&self) -> bool {
        self.mode & TYPE_MASK == FileType::File.bits()
    }

    pub fn is_directory(&self) -> bool {
        self.mode & TYPE_MASK == FileType::Directory.bits()
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.mode & TYPE_MASK == FileType::Symlink.bits()
    }

    pub fn permissions(&self) -> u16 {
        self.mode & PERMISSION_MASK
    }

    /// Replaces the permission bits, keeping the type.
    pub fn chmod(&mut self, mode: u16) {
        self.mode = (self.mode & TYPE_MASK) | (mode & PERMISSION_MASK);
    }

    /// Updates `size` and the derived block count.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = size.div_ceil(512);
    }
}
