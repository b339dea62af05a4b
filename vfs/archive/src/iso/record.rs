//! Directory records and the directories built from them.

use std::fmt;

use bytes::Bytes;
use indexmap::IndexMap;

use bfs_core::{ApiError, FileType, READ_ONLY_MODE, Result, Stats};

use super::SECTOR_SIZE;
use super::susp::{
    NM_CONTINUE, NM_CURRENT, NM_PARENT, ROCK_RIDGE_IDENTIFIERS, SL_CONTINUE, SL_CURRENT,
    SL_PARENT, SL_ROOT, SystemUseEntry, parse_entries,
};
use super::text::{Encoding, short_form_date};

const MIN_RECORD_LEN: usize = 33;
const FLAG_DIRECTORY: u8 = 0x2;

fn u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// One directory record, as a slice of the image.
#[derive(Clone)]
pub(crate) struct DirectoryRecord {
    data: Bytes,
    encoding: Encoding,
    /// Bytes to skip before Rock Ridge entries; `None` when the volume
    /// carries no Rock Ridge extensions.
    rock_ridge: Option<usize>,
}

impl DirectoryRecord {
    pub(crate) fn parse(
        iso: &Bytes,
        offset: usize,
        encoding: Encoding,
        rock_ridge: Option<usize>,
    ) -> Result<Self> {
        let len = iso.get(offset).copied().map(usize::from).unwrap_or(0);
        if len < MIN_RECORD_LEN || offset + len > iso.len() {
            return Err(ApiError::eio(format!(
                "Invalid directory record at offset {offset}."
            )));
        }
        let data = iso.slice(offset..offset + len);
        let id_len = usize::from(data[32]);
        if MIN_RECORD_LEN + id_len > len {
            return Err(ApiError::eio(format!(
                "Directory record at offset {offset} overflows its identifier."
            )));
        }
        Ok(Self {
            data,
            encoding,
            rock_ridge,
        })
    }

    pub(crate) fn with_rock_ridge(mut self, rock_ridge: Option<usize>) -> Self {
        self.rock_ridge = rock_ridge;
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Byte offset of the extent.
    pub(crate) fn lba(&self) -> usize {
        u32_le(&self.data, 2) as usize * SECTOR_SIZE
    }

    pub(crate) fn data_length(&self) -> usize {
        u32_le(&self.data, 10) as usize
    }

    pub(crate) fn recording_date_ms(&self) -> f64 {
        short_form_date(&self.data[18..25]).unwrap_or(0.0)
    }

    pub(crate) fn file_flags(&self) -> u8 {
        self.data[25]
    }

    fn identifier(&self) -> &[u8] {
        let id_len = usize::from(self.data[32]);
        &self.data[33..33 + id_len]
    }

    /// The `\0` (self) and `\1` (parent) entries of a directory.
    pub(crate) fn is_self_or_parent(&self) -> bool {
        matches!(self.identifier(), [0] | [1])
    }

    pub(crate) fn has_rock_ridge(&self) -> bool {
        self.rock_ridge.is_some()
    }

    fn system_use_start(&self) -> usize {
        let start = 33 + self.identifier().len();
        // Identifiers are padded to an even length.
        start + start % 2
    }

    /// System use entries after skipping `skip` bytes.
    fn entries_after(&self, skip: usize, iso: &[u8]) -> Vec<SystemUseEntry> {
        let start = self.system_use_start() + skip;
        parse_entries(&self.data, start, self.data.len(), iso)
    }

    /// Rock Ridge entries of this record; empty without Rock Ridge.
    pub(crate) fn su_entries(&self, iso: &[u8]) -> Vec<SystemUseEntry> {
        match self.rock_ridge {
            Some(skip) => self.entries_after(skip, iso),
            None => Vec::new(),
        }
    }

    /// Inspects the SUSP area of a root `.` entry. Returns the number of
    /// bytes to skip in every record when Rock Ridge is in use.
    pub(crate) fn rock_ridge_offset(&self, iso: &[u8]) -> Option<usize> {
        let entries = self.entries_after(0, iso);
        let (first, rest) = entries.split_first()?;
        let SystemUseEntry::Sp {
            check_bytes_pass: true,
            bytes_skipped,
        } = first
        else {
            return None;
        };
        let announced = rest.iter().any(|e| match e {
            SystemUseEntry::Rr => true,
            SystemUseEntry::Er { identifier } => {
                ROCK_RIDGE_IDENTIFIERS.contains(&identifier.as_str())
            }
            _ => false,
        });
        announced.then_some(usize::from(*bytes_skipped))
    }

    pub(crate) fn is_directory(&self, iso: &[u8]) -> bool {
        self.file_flags() & FLAG_DIRECTORY != 0
            || self
                .su_entries(iso)
                .iter()
                .any(|e| matches!(e, SystemUseEntry::Cl { .. }))
    }

    pub(crate) fn is_relocated(&self, iso: &[u8]) -> bool {
        self.su_entries(iso)
            .iter()
            .any(|e| matches!(e, SystemUseEntry::Re))
    }

    /// Target of a Rock Ridge symbolic link.
    pub(crate) fn symlink_target(&self, iso: &[u8]) -> Option<String> {
        let entries = self.su_entries(iso);
        let links = entries.iter().filter_map(|e| match e {
            SystemUseEntry::Sl { flags, components } => Some((*flags, components)),
            _ => None,
        });
        let mut target = String::new();
        let mut found = false;
        for (flags, components) in links {
            found = true;
            for component in components {
                if component.flags & SL_CURRENT != 0 {
                    target.push_str("./");
                } else if component.flags & SL_PARENT != 0 {
                    target.push_str("../");
                } else if component.flags & SL_ROOT != 0 {
                    target.push('/');
                } else {
                    target.push_str(&self.encoding.decode(&component.content));
                    if component.flags & SL_CONTINUE == 0 {
                        target.push('/');
                    }
                }
            }
            if flags & SL_CONTINUE == 0 {
                break;
            }
        }
        if !found {
            return None;
        }
        if target.len() > 1 && target.ends_with('/') {
            target.pop();
        }
        Some(target)
    }

    pub(crate) fn is_symlink(&self, iso: &[u8]) -> bool {
        self.su_entries(iso)
            .iter()
            .any(|e| matches!(e, SystemUseEntry::Sl { .. }))
    }

    /// The alternate name from `NM` entries, concatenated while they carry
    /// the continue flag.
    fn rock_ridge_name(&self, entries: &[SystemUseEntry]) -> Option<String> {
        let mut names = entries.iter().filter_map(|e| match e {
            SystemUseEntry::Nm { flags, name } => Some((*flags, name)),
            _ => None,
        });
        let (flags, first) = names.next()?;
        if flags & (NM_CURRENT | NM_PARENT) != 0 {
            return None;
        }
        let mut name = self.encoding.decode(first);
        let mut more = flags & NM_CONTINUE != 0;
        for (flags, part) in names {
            if !more {
                break;
            }
            name.push_str(&self.encoding.decode(part));
            more = flags & NM_CONTINUE != 0;
        }
        Some(name)
    }

    pub(crate) fn file_name(&self, iso: &[u8]) -> String {
        if self.has_rock_ridge() {
            if let Some(name) = self.rock_ridge_name(&self.su_entries(iso)) {
                return name;
            }
        }
        let name = self.encoding.decode(self.identifier());
        if self.is_directory(iso) {
            return name;
        }
        match name.find(';') {
            Some(idx) => {
                let stem = &name[..idx];
                stem.strip_suffix('.').unwrap_or(stem).to_owned()
            }
            None => name,
        }
    }

    /// Contents of a file extent.
    pub(crate) fn contents(&self, iso: &Bytes) -> Result<Bytes> {
        let start = self.lba();
        let end = start + self.data_length();
        if end > iso.len() {
            return Err(ApiError::eio("File extent lies outside of the image."));
        }
        Ok(iso.slice(start..end))
    }

    pub(crate) fn stats(&self, iso: &[u8]) -> Stats {
        let date = self.recording_date_ms();
        let (mut atime, mut mtime, mut ctime) = (date, date, date);
        let mut mode = u32::from(READ_ONLY_MODE);
        let (mut uid, mut gid) = (0, 0);
        for entry in self.su_entries(iso) {
            match entry {
                SystemUseEntry::Px {
                    mode: m,
                    uid: u,
                    gid: g,
                    ..
                } => {
                    mode = m;
                    uid = u;
                    gid = g;
                }
                SystemUseEntry::Tf {
                    creation,
                    modify,
                    access,
                } => {
                    atime = access.unwrap_or(atime);
                    mtime = modify.unwrap_or(mtime);
                    ctime = creation.unwrap_or(ctime);
                }
                _ => {}
            }
        }
        let file_type = if self.is_directory(iso) {
            FileType::Directory
        } else {
            FileType::File
        };
        // Write bits are masked out of a read-only volume.
        let perms = (mode as u16) & READ_ONLY_MODE;
        Stats::new(file_type, self.data_length() as u64, Some(perms))
            .with_times(atime, mtime, ctime)
            .with_owner(uid, gid)
    }

    pub(crate) fn link_stats(&self, iso: &[u8], target: &str) -> Stats {
        let file = self.stats(iso);
        let mut stats = Stats::new(FileType::Symlink, target.len() as u64, Some(file.permissions()))
            .with_times(file.atime_ms, file.mtime_ms, file.ctime_ms);
        stats.uid = file.uid;
        stats.gid = file.gid;
        stats
    }
}

impl fmt::Debug for DirectoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRecord")
            .field("identifier", &self.encoding.decode(self.identifier()))
            .field("lba", &self.lba())
            .field("data_length", &self.data_length())
            .field("flags", &self.file_flags())
            .finish()
    }
}

/// The visible children of one directory, in on-disc order.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    children: IndexMap<String, DirectoryRecord>,
}

impl Directory {
    /// Where the directory's records start and, when the record says, where
    /// they end. A Rock Ridge placeholder resolves to its relocated target,
    /// whose length comes from the target's own `.` record.
    pub(crate) fn extent(record: &DirectoryRecord, iso: &[u8]) -> Result<(usize, Option<usize>)> {
        let start = record.lba();
        if record.file_flags() & FLAG_DIRECTORY != 0 {
            return Ok((start, Some(start + record.data_length())));
        }
        let child = record.su_entries(iso).into_iter().find_map(|e| match e {
            SystemUseEntry::Cl { child_lba } => Some(child_lba),
            _ => None,
        });
        match child {
            Some(child_lba) => Ok((child_lba as usize * SECTOR_SIZE, None)),
            None => Err(ApiError::eio("Tried to get a directory from a file.")),
        }
    }

    pub(crate) fn parse(record: &DirectoryRecord, iso: &Bytes) -> Result<Self> {
        let (mut i, mut limit) = Self::extent(record, iso)?;

        let mut children = IndexMap::new();
        while i < iso.len() && limit.is_none_or(|end| i < end) {
            if iso[i] == 0 {
                // Records never straddle sectors; the rest is padding.
                i = (i / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            let child = DirectoryRecord::parse(iso, i, record.encoding, record.rock_ridge)?;
            i += child.len();
            if child.is_self_or_parent() {
                if limit.is_none() {
                    limit = Some(i - child.len() + child.data_length());
                }
                continue;
            }
            if child.has_rock_ridge() && child.is_relocated(iso) {
                continue;
            }
            children.insert(child.file_name(iso), child);
        }
        Ok(Self { children })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&DirectoryRecord> {
        self.children.get(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }
}
