//! Character sets and timestamp layouts used by ISO 9660 records.

use crate::time::utc_ms;

/// How identifiers in a directory hierarchy are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    /// d-characters of the primary volume descriptor.
    Ascii,
    /// UCS-2 big endian, from a Joliet supplementary volume descriptor.
    Joliet,
}

impl Encoding {
    pub(crate) fn decode(self, raw: &[u8]) -> String {
        match self {
            Encoding::Ascii => ascii(raw),
            Encoding::Joliet => joliet(raw),
        }
    }
}

pub(crate) fn ascii(raw: &[u8]) -> String {
    let s: String = raw.iter().map(|&b| char::from(b)).collect();
    s.trim().to_owned()
}

/// Single-byte identifiers (the `\0` and `\1` self/parent entries) are kept
/// as raw bytes even on Joliet volumes.
pub(crate) fn joliet(raw: &[u8]) -> String {
    if raw.len() == 1 {
        return char::from(raw[0]).to_string();
    }
    let units = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn gmt_offset_ms(raw: u8) -> f64 {
    f64::from(raw as i8) * 15.0 * 60_000.0
}

/// Seven-byte recording date: years since 1900, month, day, hour, minute,
/// second and GMT offset in 15 minute intervals.
pub(crate) fn short_form_date(raw: &[u8]) -> Option<f64> {
    let raw: &[u8; 7] = raw.get(..7)?.try_into().ok()?;
    let local = utc_ms(
        1900 + i64::from(raw[0]),
        u32::from(raw[1]),
        u32::from(raw[2]),
        u32::from(raw[3]),
        u32::from(raw[4]),
        u32::from(raw[5]),
    );
    Some(local - gmt_offset_ms(raw[6]))
}

/// Seventeen-byte volume date: sixteen ASCII digits (`YYYYMMDDHHMMSScc`)
/// followed by the GMT offset byte. An all-zero year means "not specified".
pub(crate) fn long_form_date(raw: &[u8]) -> Option<f64> {
    let raw = raw.get(..17)?;
    let field = |range: std::ops::Range<usize>| -> Option<u32> { ascii(&raw[range]).parse().ok() };
    let year = field(0..4)?;
    if year == 0 {
        return None;
    }
    let local = utc_ms(
        i64::from(year),
        field(4..6)?,
        field(6..8)?,
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
    );
    let hundredths = f64::from(field(14..16)?);
    Some(local + hundredths * 10.0 - gmt_offset_ms(raw[16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joliet_is_big_endian_ucs2() {
        assert_eq!(joliet(&[0x00, b'a', 0x00, 0xE9]), "aé");
        assert_eq!(joliet(&[0x01]), "\u{1}");
        assert_eq!(ascii(b"README.TXT;1  "), "README.TXT;1");
    }

    #[test]
    fn dates_apply_gmt_offset() {
        let utc = short_form_date(&[100, 1, 2, 3, 4, 5, 0]).unwrap();
        assert_eq!(utc, utc_ms(2000, 1, 2, 3, 4, 5));
        // One hour ahead of GMT.
        let ahead = short_form_date(&[100, 1, 2, 3, 4, 5, 4]).unwrap();
        assert_eq!(utc - ahead, 3_600_000.0);

        let mut long = b"2001020304050600".to_vec();
        long.push(0);
        assert_eq!(long_form_date(&long).unwrap(), utc_ms(2001, 2, 3, 4, 5, 6));
        assert_eq!(long_form_date(&[b'0'; 17]), None);
    }
}
