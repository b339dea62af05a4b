//! System Use Sharing Protocol entries and the Rock Ridge extensions
//! carried in them.

use super::SECTOR_SIZE;
use super::text::{long_form_date, short_form_date};

/// Extension identifiers announcing Rock Ridge in an `ER` entry.
pub(crate) const ROCK_RIDGE_IDENTIFIERS: [&str; 2] = ["IEEE_P1282", "RRIP_1991A"];

/// Continuation areas followed for one record before the rest are ignored.
const MAX_CONTINUATIONS: usize = 16;
/// Continuation area bytes read for one record.
const MAX_CONTINUATION_BYTES: usize = 64 * 1024;

pub(crate) const NM_CONTINUE: u8 = 0x1;
pub(crate) const NM_CURRENT: u8 = 0x2;
pub(crate) const NM_PARENT: u8 = 0x4;

pub(crate) const SL_CONTINUE: u8 = 0x1;
pub(crate) const SL_CURRENT: u8 = 0x2;
pub(crate) const SL_PARENT: u8 = 0x4;
pub(crate) const SL_ROOT: u8 = 0x8;

const TF_CREATION: u8 = 0x1;
const TF_MODIFY: u8 = 0x2;
const TF_ACCESS: u8 = 0x4;
const TF_LONG_FORM: u8 = 0x80;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SlComponent {
    pub flags: u8,
    pub content: Vec<u8>,
}

/// A decoded system use entry. `CE` and `ST` steer parsing and never
/// appear in the output. Entries that do not affect lookups or stats are
/// recognised but not decoded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SystemUseEntry {
    Sp { check_bytes_pass: bool, bytes_skipped: u8 },
    Pd,
    Er { identifier: String },
    Es,
    Rr,
    Px { mode: u32, uid: u32, gid: u32 },
    Pn,
    Sl { flags: u8, components: Vec<SlComponent> },
    Nm { flags: u8, name: Vec<u8> },
    Cl { child_lba: u32 },
    Pl,
    Re,
    Tf { creation: Option<f64>, modify: Option<f64>, access: Option<f64> },
    Sf,
    Unknown,
}

fn u32_le(raw: &[u8], off: usize) -> u32 {
    raw.get(off..off + 4)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn byte(raw: &[u8], off: usize) -> u8 {
    raw.get(off).copied().unwrap_or(0)
}

impl SystemUseEntry {
    fn parse(raw: &[u8]) -> Self {
        let signature = [raw[0], raw[1]];
        match &signature {
            b"SP" => SystemUseEntry::Sp {
                check_bytes_pass: byte(raw, 4) == 0xBE && byte(raw, 5) == 0xEF,
                bytes_skipped: byte(raw, 6),
            },
            b"PD" => SystemUseEntry::Pd,
            b"ER" => {
                let len = usize::from(byte(raw, 4));
                let identifier = raw
                    .get(8..8 + len)
                    .map(super::text::ascii)
                    .unwrap_or_default();
                SystemUseEntry::Er { identifier }
            }
            b"ES" => SystemUseEntry::Es,
            b"RR" => SystemUseEntry::Rr,
            b"PX" => SystemUseEntry::Px {
                mode: u32_le(raw, 4),
                uid: u32_le(raw, 20),
                gid: u32_le(raw, 28),
            },
            b"PN" => SystemUseEntry::Pn,
            b"SL" => SystemUseEntry::Sl {
                flags: byte(raw, 4),
                components: sl_components(raw),
            },
            b"NM" => SystemUseEntry::Nm {
                flags: byte(raw, 4),
                name: raw.get(5..).unwrap_or_default().to_vec(),
            },
            b"CL" => SystemUseEntry::Cl {
                child_lba: u32_le(raw, 4),
            },
            b"PL" => SystemUseEntry::Pl,
            b"RE" => SystemUseEntry::Re,
            b"TF" => parse_tf(raw),
            b"SF" => SystemUseEntry::Sf,
            _ => {
                tracing::warn!(
                    signature = %String::from_utf8_lossy(&signature),
                    "unknown system use entry"
                );
                SystemUseEntry::Unknown
            }
        }
    }
}

fn sl_components(raw: &[u8]) -> Vec<SlComponent> {
    let mut components = Vec::new();
    let mut i = 5;
    while i + 2 <= raw.len() {
        let flags = raw[i];
        let len = usize::from(raw[i + 1]);
        let Some(content) = raw.get(i + 2..i + 2 + len) else {
            break;
        };
        components.push(SlComponent {
            flags,
            content: content.to_vec(),
        });
        i += 2 + len;
    }
    components
}

/// Timestamps are recorded in flag-bit order, each either 7 or 17 bytes.
fn parse_tf(raw: &[u8]) -> SystemUseEntry {
    let flags = byte(raw, 4);
    let long = flags & TF_LONG_FORM != 0;
    let width = if long { 17 } else { 7 };
    let mut stamps = [None; 7];
    let mut off = 5;
    for (bit, stamp) in stamps.iter_mut().enumerate() {
        if flags & (1 << bit) == 0 {
            continue;
        }
        let field = raw.get(off..).unwrap_or_default();
        *stamp = if long {
            long_form_date(field)
        } else {
            short_form_date(field)
        };
        off += width;
    }
    let at = |flag: u8| stamps[flag.trailing_zeros() as usize];
    SystemUseEntry::Tf {
        creation: at(TF_CREATION),
        modify: at(TF_MODIFY),
        access: at(TF_ACCESS),
    }
}

/// Parses the entries in `data[start..end]`, following continuation areas
/// into `iso`.
pub(crate) fn parse_entries(data: &[u8], start: usize, end: usize, iso: &[u8]) -> Vec<SystemUseEntry> {
    let mut entries = Vec::new();
    let mut budget = Budget {
        areas: MAX_CONTINUATIONS,
        bytes: MAX_CONTINUATION_BYTES,
    };
    parse_into(&mut entries, data, start, end, iso, &mut budget);
    entries
}

/// What is left of a record's continuation allowance.
struct Budget {
    areas: usize,
    bytes: usize,
}

fn parse_into(
    entries: &mut Vec<SystemUseEntry>,
    data: &[u8],
    start: usize,
    end: usize,
    iso: &[u8],
    budget: &mut Budget,
) {
    // Fewer than four trailing bytes cannot hold an entry.
    let limit = end.min(data.len());
    let mut i = start;
    while i + 4 <= limit {
        let len = usize::from(data[i + 2]);
        if len < 4 {
            break;
        }
        let Some(raw) = data.get(i..i + len) else {
            tracing::warn!(offset = i, len, "system use entry runs past its area");
            break;
        };
        i += len;
        match &raw[..2] {
            b"ST" => break,
            b"CE" => {
                let area_len = u32_le(raw, 20) as usize;
                if budget.areas == 0 || area_len > budget.bytes {
                    tracing::warn!(area_len, "system use continuation areas exceed their budget");
                    continue;
                }
                budget.areas -= 1;
                budget.bytes -= area_len;
                let area = (u32_le(raw, 4) as usize)
                    .saturating_mul(SECTOR_SIZE)
                    .saturating_add(u32_le(raw, 12) as usize);
                parse_into(entries, iso, area, area.saturating_add(area_len), iso, budget);
            }
            _ => entries.push(SystemUseEntry::parse(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(sig: &[u8; 2], body: &[u8]) -> Vec<u8> {
        let mut out = sig.to_vec();
        out.push((4 + body.len()) as u8);
        out.push(1);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn parses_until_terminator() {
        let mut area = entry(b"NM", &[0, b'a', b'b']);
        area.extend(entry(b"RR", &[0x89]));
        area.extend(entry(b"ST", &[]));
        area.extend(entry(b"NM", &[0, b'z']));
        area.extend([0u8; 4]);
        let parsed = parse_entries(&area, 0, area.len(), &area);
        assert_eq!(
            parsed,
            vec![
                SystemUseEntry::Nm {
                    flags: 0,
                    name: b"ab".to_vec()
                },
                SystemUseEntry::Rr,
            ]
        );
    }

    #[test]
    fn continuation_area_is_spliced_in() {
        let mut iso = vec![0u8; SECTOR_SIZE];
        iso.extend(entry(b"NM", &[0, b'x']));
        let mut ce = Vec::new();
        ce.extend_from_slice(&1u32.to_le_bytes());
        ce.extend_from_slice(&1u32.to_be_bytes());
        ce.extend_from_slice(&0u32.to_le_bytes());
        ce.extend_from_slice(&0u32.to_be_bytes());
        ce.extend_from_slice(&6u32.to_le_bytes());
        ce.extend_from_slice(&6u32.to_be_bytes());
        let mut area = entry(b"CE", &ce);
        area.extend([0u8; 4]);
        let parsed = parse_entries(&area, 0, area.len(), &iso);
        assert_eq!(
            parsed,
            vec![SystemUseEntry::Nm {
                flags: 0,
                name: b"x".to_vec()
            }]
        );
    }

    fn ce(sector: u32, offset: u32, len: u32) -> Vec<u8> {
        let mut body = Vec::new();
        for value in [sector, offset, len] {
            body.extend_from_slice(&value.to_le_bytes());
            body.extend_from_slice(&value.to_be_bytes());
        }
        entry(b"CE", &body)
    }

    #[test]
    fn continuation_cycles_stop_at_the_area_limit() {
        // Sector 1 names itself twice as a continuation.
        let mut looping = entry(b"NM", &[0, b'x']);
        let len = (looping.len() + 2 * 28) as u32;
        looping.extend(ce(1, 0, len));
        looping.extend(ce(1, 0, len));
        let mut iso = vec![0u8; SECTOR_SIZE];
        iso.extend(&looping);

        let start = ce(1, 0, len);
        let parsed = parse_entries(&start, 0, start.len(), &iso);
        assert_eq!(parsed.len(), MAX_CONTINUATIONS);
        assert!(parsed.iter().all(|e| matches!(e, SystemUseEntry::Nm { .. })));
    }

    #[test]
    fn oversized_continuation_areas_are_skipped() {
        let mut iso = vec![0u8; SECTOR_SIZE];
        iso.extend(entry(b"NM", &[0, b'x']));
        let mut area = ce(1, 0, (MAX_CONTINUATION_BYTES + 1) as u32);
        area.extend(ce(1, 0, 6));
        let parsed = parse_entries(&area, 0, area.len(), &iso);
        assert_eq!(
            parsed,
            vec![SystemUseEntry::Nm {
                flags: 0,
                name: b"x".to_vec()
            }]
        );
    }

    #[test]
    fn timestamps_follow_flag_order() {
        let mut body = vec![TF_MODIFY | TF_ACCESS];
        body.extend_from_slice(&[100, 1, 1, 0, 0, 0, 0]);
        body.extend_from_slice(&[101, 1, 1, 0, 0, 0, 0]);
        let raw = entry(b"TF", &body);
        let SystemUseEntry::Tf {
            creation,
            modify,
            access,
        } = SystemUseEntry::parse(&raw)
        else {
            panic!("expected TF");
        };
        assert_eq!(creation, None);
        assert_eq!(modify, short_form_date(&[100, 1, 1, 0, 0, 0, 0]));
        assert_eq!(access, short_form_date(&[101, 1, 1, 0, 0, 0, 0]));
    }
}
