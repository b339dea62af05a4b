//! Views over the fixed-layout records of a ZIP archive.

use std::fmt;

use bytes::Bytes;

use bfs_core::{ApiError, FileType, READ_ONLY_MODE, Result, Stats};

use super::compression::CompressionMethod;
use super::cp437;
use crate::time::utc_ms;

pub(crate) const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub(crate) const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub(crate) const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

const EOCD_LEN: usize = 22;
const CENTRAL_DIRECTORY_LEN: usize = 46;
const LOCAL_HEADER_LEN: usize = 30;
const MAX_COMMENT_LEN: usize = 0xFFFF;

const FLAG_ENCRYPTED: u16 = 0x1;
const FLAG_UTF8: u16 = 0x800;
const ATTR_DIRECTORY: u32 = 0x10;

fn u16_at(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn u32_at(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Decodes an MS-DOS date/time pair, read as UTC.
pub(crate) fn msdos_to_ms(time: u16, date: u16) -> f64 {
    let day = u32::from(date & 0x1F);
    let month = u32::from((date >> 5) & 0xF);
    let year = i64::from(date >> 9) + 1980;
    let sec = u32::from(time & 0x1F) * 2;
    let min = u32::from((time >> 5) & 0x3F);
    let hour = u32::from(time >> 11);
    utc_ms(year, month, day, hour, min, sec)
}

fn decode_name(raw: &[u8], utf8: bool) -> String {
    if utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        cp437::decode(raw)
    }
}

/// The end of central directory record.
#[derive(Clone)]
pub struct EndOfCentralDirectory {
    data: Bytes,
}

impl EndOfCentralDirectory {
    /// Scans backwards from the end of `archive` for the record signature.
    /// The record may be followed by a comment of up to 64 KiB.
    pub(crate) fn locate(archive: &Bytes) -> Result<Self> {
        let missing = || {
            ApiError::einval(
                "Invalid ZIP file: Could not locate End of Central Directory signature.",
            )
        };
        let last = archive.len().checked_sub(EOCD_LEN).ok_or_else(missing)?;
        let first = last.saturating_sub(MAX_COMMENT_LEN);
        (first..=last)
            .rev()
            .find(|&i| u32_at(archive, i) == EOCD_SIGNATURE)
            .map(|i| Self {
                data: archive.slice(i..),
            })
            .ok_or_else(missing)
    }

    pub fn disk_number(&self) -> u16 {
        u16_at(&self.data, 4)
    }

    pub fn cd_disk_number(&self) -> u16 {
        u16_at(&self.data, 6)
    }

    pub fn cd_disk_entry_count(&self) -> u16 {
        u16_at(&self.data, 8)
    }

    pub fn cd_total_entry_count(&self) -> u16 {
        u16_at(&self.data, 10)
    }

    pub fn cd_size(&self) -> u32 {
        u32_at(&self.data, 12)
    }

    pub fn cd_offset(&self) -> u32 {
        u32_at(&self.data, 16)
    }

    pub fn comment(&self) -> String {
        let len = usize::from(u16_at(&self.data, 20));
        let end = (EOCD_LEN + len).min(self.data.len());
        cp437::decode(&self.data[EOCD_LEN..end])
    }
}

impl fmt::Debug for EndOfCentralDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndOfCentralDirectory")
            .field("disk_number", &self.disk_number())
            .field("cd_disk_number", &self.cd_disk_number())
            .field("cd_total_entry_count", &self.cd_total_entry_count())
            .field("cd_size", &self.cd_size())
            .field("cd_offset", &self.cd_offset())
            .finish()
    }
}

/// One central directory entry, borrowing from the archive buffer.
#[derive(Clone)]
pub struct CentralDirectory {
    archive: Bytes,
    record: Bytes,
    name: String,
}

impl CentralDirectory {
    pub(crate) fn parse(archive: &Bytes, offset: usize) -> Result<Self> {
        let header = archive
            .get(offset..offset + CENTRAL_DIRECTORY_LEN)
            .ok_or_else(|| ApiError::einval("Invalid ZIP file: Central directory is truncated."))?;
        let signature = u32_at(header, 0);
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ApiError::einval(format!(
                "Invalid Zip file: Central directory record has invalid signature: {signature}"
            )));
        }
        let name_len = usize::from(u16_at(header, 28));
        let extra_len = usize::from(u16_at(header, 30));
        let comment_len = usize::from(u16_at(header, 32));
        let total = CENTRAL_DIRECTORY_LEN + name_len + extra_len + comment_len;
        if archive.len() < offset + total {
            return Err(ApiError::einval(
                "Invalid ZIP file: Central directory is truncated.",
            ));
        }
        let record = archive.slice(offset..offset + total);
        let flag = u16_at(&record, 8);
        let raw = &record[CENTRAL_DIRECTORY_LEN..CENTRAL_DIRECTORY_LEN + name_len];
        let name = decode_name(raw, flag & FLAG_UTF8 != 0).replace('\\', "/");
        Ok(Self {
            archive: archive.clone(),
            record,
            name,
        })
    }

    pub fn version_made_by(&self) -> u16 {
        u16_at(&self.record, 4)
    }

    pub fn version_needed(&self) -> u16 {
        u16_at(&self.record, 6)
    }

    pub fn flag(&self) -> u16 {
        u16_at(&self.record, 8)
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::from_id(u16_at(&self.record, 10))
    }

    pub fn last_modified_ms(&self) -> f64 {
        msdos_to_ms(u16_at(&self.record, 12), u16_at(&self.record, 14))
    }

    pub fn crc32(&self) -> u32 {
        u32_at(&self.record, 16)
    }

    pub fn compressed_size(&self) -> u32 {
        u32_at(&self.record, 20)
    }

    pub fn uncompressed_size(&self) -> u32 {
        u32_at(&self.record, 24)
    }

    fn name_len(&self) -> usize {
        usize::from(u16_at(&self.record, 28))
    }

    fn extra_len(&self) -> usize {
        usize::from(u16_at(&self.record, 30))
    }

    /// Entry name with `\` separators normalized to `/`.
    pub fn file_name(&self) -> &str {
        &self.name
    }

    pub fn extra_field(&self) -> &[u8] {
        let start = CENTRAL_DIRECTORY_LEN + self.name_len();
        &self.record[start..start + self.extra_len()]
    }

    pub fn file_comment(&self) -> String {
        let start = CENTRAL_DIRECTORY_LEN + self.name_len() + self.extra_len();
        decode_name(&self.record[start..], self.flag() & FLAG_UTF8 != 0)
    }

    pub fn disk_number_start(&self) -> u16 {
        u16_at(&self.record, 34)
    }

    pub fn internal_attributes(&self) -> u16 {
        u16_at(&self.record, 36)
    }

    pub fn external_attributes(&self) -> u32 {
        u32_at(&self.record, 38)
    }

    pub fn header_relative_offset(&self) -> u32 {
        u32_at(&self.record, 42)
    }

    /// Length of the record, variable fields included.
    pub fn total_size(&self) -> usize {
        self.record.len()
    }

    pub fn is_directory(&self) -> bool {
        self.external_attributes() & ATTR_DIRECTORY != 0 || self.name.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flag() & FLAG_ENCRYPTED != 0
    }

    /// The entry's compressed bytes, located through its local file header.
    pub fn raw_data(&self) -> Result<Bytes> {
        let offset = self.header_relative_offset() as usize;
        let header = self
            .archive
            .get(offset..offset + LOCAL_HEADER_LEN)
            .ok_or_else(|| ApiError::einval("Invalid ZIP file: Local file header is truncated."))?;
        let signature = u32_at(header, 0);
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(ApiError::einval(format!(
                "Invalid Zip file: Local file header has invalid signature: {signature}"
            )));
        }
        let start = offset
            + LOCAL_HEADER_LEN
            + usize::from(u16_at(header, 26))
            + usize::from(u16_at(header, 28));
        let end = start + self.compressed_size() as usize;
        if end > self.archive.len() {
            return Err(ApiError::einval(format!(
                "Invalid ZIP file: Data for '{}' extends past the end of the archive.",
                self.name
            )));
        }
        Ok(self.archive.slice(start..end))
    }

    pub fn stats(&self) -> Stats {
        let mtime = self.last_modified_ms();
        let stats = if self.is_directory() {
            Stats::new(FileType::Directory, 4096, Some(READ_ONLY_MODE))
        } else {
            Stats::new(
                FileType::File,
                u64::from(self.uncompressed_size()),
                Some(READ_ONLY_MODE),
            )
        };
        stats.with_times(mtime, mtime, mtime)
    }
}

impl fmt::Debug for CentralDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralDirectory")
            .field("name", &self.name)
            .field("method", &self.compression_method())
            .field("compressed_size", &self.compressed_size())
            .field("uncompressed_size", &self.uncompressed_size())
            .finish()
    }
}
