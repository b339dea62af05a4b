use std::fmt;
use std::io::Read;
use std::sync::Arc;

use flate2::read::DeflateDecoder;

use bfs_core::{ApiError, Result};

/// Compression method identifiers from the ZIP application note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Shrunk,
    Reduced1,
    Reduced2,
    Reduced3,
    Reduced4,
    Imploded,
    Deflated,
    Deflate64,
    TerseOld,
    Bzip2,
    Lzma,
    TerseNew,
    Lz77,
    WavPack,
    Ppmd,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_id(id: u16) -> Self {
        match id {
            0 => Self::Stored,
            1 => Self::Shrunk,
            2 => Self::Reduced1,
            3 => Self::Reduced2,
            4 => Self::Reduced3,
            5 => Self::Reduced4,
            6 => Self::Imploded,
            8 => Self::Deflated,
            9 => Self::Deflate64,
            10 => Self::TerseOld,
            12 => Self::Bzip2,
            14 => Self::Lzma,
            18 => Self::TerseNew,
            19 => Self::Lz77,
            97 => Self::WavPack,
            98 => Self::Ppmd,
            other => Self::Unknown(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Shrunk => 1,
            Self::Reduced1 => 2,
            Self::Reduced2 => 3,
            Self::Reduced3 => 4,
            Self::Reduced4 => 5,
            Self::Imploded => 6,
            Self::Deflated => 8,
            Self::Deflate64 => 9,
            Self::TerseOld => 10,
            Self::Bzip2 => 12,
            Self::Lzma => 14,
            Self::TerseNew => 18,
            Self::Lz77 => 19,
            Self::WavPack => 97,
            Self::Ppmd => 98,
            Self::Unknown(id) => id,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stored => "STORED",
            Self::Shrunk => "SHRUNK",
            Self::Reduced1 => "REDUCED_1",
            Self::Reduced2 => "REDUCED_2",
            Self::Reduced3 => "REDUCED_3",
            Self::Reduced4 => "REDUCED_4",
            Self::Imploded => "IMPLODE",
            Self::Deflated => "DEFLATE",
            Self::Deflate64 => "DEFLATE64",
            Self::TerseOld => "TERSE_OLD",
            Self::Bzip2 => "BZIP2",
            Self::Lzma => "LZMA",
            Self::TerseNew => "TERSE_NEW",
            Self::Lz77 => "LZ77",
            Self::WavPack => "WAVPACK",
            Self::Ppmd => "PPMD",
            Self::Unknown(id) => return write!(f, "Unknown: {id}"),
        };
        f.write_str(name)
    }
}

/// Turns an entry's compressed bytes into `uncompressed_size` bytes of
/// content.
pub type Decompressor = Arc<dyn Fn(&[u8], usize) -> Result<Vec<u8>> + Send + Sync>;

pub(crate) fn stored() -> Decompressor {
    Arc::new(|data: &[u8], size: usize| Ok(data[..size.min(data.len())].to_vec()))
}

/// Deflate output is read one byte past the declared size so a stream that
/// disagrees with its header in either direction is rejected.
pub(crate) fn inflate() -> Decompressor {
    Arc::new(|data: &[u8], size: usize| {
        let mut out = Vec::with_capacity(size.min(data.len().saturating_mul(4)));
        DeflateDecoder::new(data)
            .take(size as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| ApiError::einval(format!("Invalid deflate stream: {e}")))?;
        if out.len() > size {
            return Err(ApiError::einval(format!(
                "Deflate stream is longer than the declared {size} bytes."
            )));
        }
        if out.len() < size {
            return Err(ApiError::einval(format!(
                "Deflate stream holds {} of the declared {size} bytes.",
                out.len()
            )));
        }
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use bfs_core::ErrorCode;

    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use pretty_assertions::assert_eq;

    #[test]
    fn names_match_the_method_table() {
        assert_eq!(CompressionMethod::from_id(8).to_string(), "DEFLATE");
        assert_eq!(CompressionMethod::from_id(12).to_string(), "BZIP2");
        assert_eq!(CompressionMethod::from_id(7).to_string(), "Unknown: 7");
        assert_eq!(CompressionMethod::from_id(98).id(), 98);
    }

    #[test]
    fn inflate_reverses_raw_deflate() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"abcabcabcabc").unwrap();
        let packed = enc.finish().unwrap();
        assert_eq!(inflate()(&packed, 12).unwrap(), b"abcabcabcabc");
        assert!(inflate()(b"\xff\xff\xff", 3).is_err());
    }

    #[test]
    fn inflate_rejects_sizes_that_disagree_with_the_header() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[7u8; 4096]).unwrap();
        let packed = enc.finish().unwrap();

        let err = inflate()(&packed, 16).unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Inval);
        assert!(err.message().contains("longer than the declared 16"));

        let err = inflate()(&packed, u32::MAX as usize).unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Inval);
        assert!(err.message().contains("holds 4096 of"));

        assert_eq!(inflate()(&packed, 4096).unwrap().len(), 4096);
    }
}
