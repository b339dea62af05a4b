//! Fixed-layout metadata record persisted by key-value backends.
//!
//! Layout (little endian):
//!
//! | offset | type  | field |
//! |--------|-------|-------|
//! | 0      | u32   | size  |
//! | 4      | u16   | mode  |
//! | 6      | f64   | atime (ms) |
//! | 14     | f64   | mtime (ms) |
//! | 22     | f64   | ctime (ms) |
//! | 30     | ASCII | id (rest of the buffer) |

use crate::stats::{FileType, PERMISSION_MASK, Stats, TYPE_MASK};
use crate::{ApiError, ErrorCode, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    /// Key of the data node this inode describes.
    pub id: String,
    pub size: u32,
    pub mode: u16,
    pub atime: f64,
    pub mtime: f64,
    pub ctime: f64,
}

impl Inode {
    pub const HEADER_LEN: usize = 30;

    pub fn new(id: String, size: u32, mode: u16, atime: f64, mtime: f64, ctime: f64) -> Self {
        Self {
            id,
            size,
            mode,
            atime,
            mtime,
            ctime,
        }
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < Self::HEADER_LEN {
            return Err(ApiError::eio(format!(
                "Inode record is {} bytes, expected at least {}.",
                buffer.len(),
                Self::HEADER_LEN
            )));
        }
        let id_bytes = &buffer[Self::HEADER_LEN..];
        if !id_bytes.is_ascii() {
            return Err(ApiError::eio("Inode id is not ASCII."));
        }
        Ok(Self {
            size: u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]),
            mode: u16::from_le_bytes([buffer[4], buffer[5]]),
            atime: read_f64(buffer, 6),
            mtime: read_f64(buffer, 14),
            ctime: read_f64(buffer, 22),
            id: String::from_utf8_lossy(id_bytes).into_owned(),
        })
    }

    pub fn size_of(&self) -> usize {
        Self::HEADER_LEN + self.id.len()
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_of());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.extend_from_slice(&self.atime.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.ctime.to_le_bytes());
        out.extend_from_slice(self.id.as_bytes());
        out
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode).unwrap_or(FileType::File)
    }

    pub fn to_stats(&self) -> Stats {
        Stats::new(
            self.file_type(),
            u64::from(self.size),
            Some(self.mode & PERMISSION_MASK),
        )
        .with_times(self.atime, self.mtime, self.ctime)
    }

    /// Copies size, mode and timestamps from `stats`; returns whether
    /// anything changed. The type nibble stays the inode's own. A size the
    /// record cannot hold is `EFBIG` and leaves the inode untouched.
    pub fn update(&mut self, stats: &Stats) -> Result<bool> {
        let size = u32::try_from(stats.size).map_err(|_| ApiError::from_code(ErrorCode::Fbig))?;
        let mut changed = false;
        if self.size != size {
            self.size = size;
            changed = true;
        }
        let mode = (self.mode & TYPE_MASK) | (stats.mode & PERMISSION_MASK);
        if self.mode != mode {
            self.mode = mode;
            changed = true;
        }
        if self.atime != stats.atime_ms {
            self.atime = stats.atime_ms;
            changed = true;
        }
        if self.mtime != stats.mtime_ms {
            self.mtime = stats.mtime_ms;
            changed = true;
        }
        if self.ctime != stats.ctime_ms {
            self.ctime = stats.ctime_ms;
            changed = true;
        }
        Ok(changed)
    }

    pub fn is_file(&self) -> bool {
        self.mode & TYPE_MASK == FileType::File.bits()
    }

    pub fn is_directory(&self) -> bool {
        self.mode & TYPE_MASK == FileType::Directory.bits()
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & TYPE_MASK == FileType::Symlink.bits()
    }
}

fn read_f64(buffer: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buffer[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Inode {
        Inode::new(
            "3f2a9c1e-0000-4000-8000-000000000000".into(),
            1234,
            0x8000 | 0o644,
            1.5,
            2.5,
            3.5,
        )
    }

    #[test]
    fn header_layout() {
        let inode = sample();
        let buf = inode.to_buffer();
        assert_eq!(buf.len(), 30 + inode.id.len());
        assert_eq!(&buf[0..4], &1234u32.to_le_bytes());
        assert_eq!(&buf[4..6], &(0x8000u16 | 0o644).to_le_bytes());
        assert_eq!(&buf[14..22], &2.5f64.to_le_bytes());
        assert_eq!(&buf[30..], inode.id.as_bytes());
        assert_eq!(Inode::from_buffer(&buf).unwrap(), inode);
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert!(Inode::from_buffer(&[0u8; 29]).is_err());
    }

    #[test]
    fn update_reports_changes_and_keeps_type() {
        let mut inode = sample();
        let mut stats = inode.to_stats();
        assert!(!inode.update(&stats).unwrap());

        stats.chmod(0o600);
        stats.mode = 0x4000 | stats.permissions();
        stats.size = 9;
        assert!(inode.update(&stats).unwrap());
        assert!(inode.is_file());
        assert_eq!(inode.mode & PERMISSION_MASK, 0o600);
        assert_eq!(inode.size, 9);
    }

    #[test]
    fn oversized_stats_are_rejected() {
        let mut inode = sample();
        let mut stats = inode.to_stats();
        stats.size = u64::from(u32::MAX) + 1;
        stats.chmod(0o600);
        assert_eq!(inode.update(&stats).unwrap_err().errno(), ErrorCode::Fbig);
        assert_eq!(inode, sample());
    }
}
