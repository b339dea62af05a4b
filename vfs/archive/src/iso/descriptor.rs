use std::fmt;

use bytes::Bytes;

use bfs_core::{ApiError, Result};

use super::SECTOR_SIZE;
use super::text::{Encoding, ascii, long_form_date};

const TYPE_PRIMARY: u8 = 1;
const TYPE_SUPPLEMENTARY: u8 = 2;
const TYPE_TERMINATOR: u8 = 255;

/// Offset of the root directory record inside a descriptor.
pub(crate) const ROOT_RECORD_OFFSET: usize = 156;

/// The directory hierarchy a volume descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Iso9660,
    Joliet,
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VolumeKind::Iso9660 => "ISO9660",
            VolumeKind::Joliet => "Joliet",
        })
    }
}

/// A primary or Joliet supplementary volume descriptor.
#[derive(Clone)]
pub(crate) struct VolumeDescriptor {
    kind: VolumeKind,
    offset: usize,
    data: Bytes,
}

impl VolumeDescriptor {
    /// Walks the descriptor set from sector 16 up to the terminator and
    /// picks the Joliet descriptor when there is one.
    pub(crate) fn select(iso: &Bytes) -> Result<Self> {
        let mut primary = None;
        let mut joliet = None;
        let mut offset = 16 * SECTOR_SIZE;
        while let Some(sector) = iso.get(offset..offset + SECTOR_SIZE) {
            match sector[0] {
                TYPE_PRIMARY => {
                    primary.get_or_insert_with(|| Self::new(VolumeKind::Iso9660, iso, offset));
                }
                TYPE_SUPPLEMENTARY => {
                    check_escape_sequence(&sector[88..120])?;
                    joliet.get_or_insert_with(|| Self::new(VolumeKind::Joliet, iso, offset));
                }
                TYPE_TERMINATOR => break,
                other => tracing::debug!(kind = other, offset, "skipping volume descriptor"),
            }
            offset += SECTOR_SIZE;
        }
        joliet
            .or(primary)
            .ok_or_else(|| ApiError::eio("Unable to find a suitable volume descriptor."))
    }

    fn new(kind: VolumeKind, iso: &Bytes, offset: usize) -> Self {
        Self {
            kind,
            offset,
            data: iso.slice(offset..offset + SECTOR_SIZE),
        }
    }

    pub(crate) fn kind(&self) -> VolumeKind {
        self.kind
    }

    pub(crate) fn encoding(&self) -> Encoding {
        match self.kind {
            VolumeKind::Iso9660 => Encoding::Ascii,
            VolumeKind::Joliet => Encoding::Joliet,
        }
    }

    /// Absolute offset of the root directory record in the image.
    pub(crate) fn root_record_offset(&self) -> usize {
        self.offset + ROOT_RECORD_OFFSET
    }

    pub(crate) fn standard_identifier(&self) -> String {
        ascii(&self.data[1..6])
    }

    pub(crate) fn volume_identifier(&self) -> String {
        self.encoding()
            .decode(&self.data[40..72])
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_owned()
    }

    pub(crate) fn volume_space_size(&self) -> u32 {
        u32::from_le_bytes([self.data[80], self.data[81], self.data[82], self.data[83]])
    }

    pub(crate) fn volume_creation_ms(&self) -> Option<f64> {
        long_form_date(&self.data[813..830])
    }
}

impl fmt::Debug for VolumeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeDescriptor")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("standard_identifier", &self.standard_identifier())
            .field("volume_identifier", &self.volume_identifier())
            .finish()
    }
}

/// Joliet descriptors name UCS-2 level 1, 2 or 3 as `%/@`, `%/C` or `%/E`.
fn check_escape_sequence(seq: &[u8]) -> Result<()> {
    match seq {
        [0x25, 0x2F, 0x40 | 0x43 | 0x45, ..] => Ok(()),
        _ => Err(ApiError::eio(format!(
            "Unrecognized escape sequence for SupplementaryVolumeDescriptor: {:?}",
            &seq[..3.min(seq.len())]
        ))),
    }
}
