//! Argument normalization applied before a call reaches the backend.

use std::time::{SystemTime, UNIX_EPOCH};

use bfs_core::{ApiError, Result, path};

/// Permission bits as a number or as an octal string such as `"755"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Bits(u16),
    Octal(String),
}

impl From<u16> for Mode {
    fn from(bits: u16) -> Self {
        Mode::Bits(bits)
    }
}

impl From<&str> for Mode {
    fn from(octal: &str) -> Self {
        Mode::Octal(octal.to_owned())
    }
}

impl From<String> for Mode {
    fn from(octal: String) -> Self {
        Mode::Octal(octal)
    }
}

impl Mode {
    /// Permission bits, or `None` for a string without a leading octal
    /// number.
    pub fn bits(&self) -> Option<u16> {
        match self {
            Mode::Bits(bits) => Some(*bits),
            Mode::Octal(s) => {
                let digits: String = s
                    .trim_start()
                    .chars()
                    .take_while(|c| matches!(c, '0'..='7'))
                    .collect();
                u16::from_str_radix(&digits, 8).ok()
            }
        }
    }

    pub fn bits_or(&self, default: u16) -> u16 {
        self.bits().unwrap_or(default)
    }
}

pub(crate) fn normalize_mode(mode: Option<Mode>, default: u16) -> u16 {
    mode.map_or(default, |m| m.bits_or(default))
}

/// A timestamp given either as a wall-clock time or as seconds since the
/// epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeArg {
    System(SystemTime),
    Seconds(f64),
}

impl From<SystemTime> for TimeArg {
    fn from(t: SystemTime) -> Self {
        TimeArg::System(t)
    }
}

impl From<f64> for TimeArg {
    fn from(secs: f64) -> Self {
        TimeArg::Seconds(secs)
    }
}

impl TimeArg {
    /// Milliseconds since the epoch.
    pub fn to_ms(self) -> Result<f64> {
        let ms = match self {
            TimeArg::System(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_secs_f64() * 1000.0,
                Err(e) => -(e.duration().as_secs_f64() * 1000.0),
            },
            TimeArg::Seconds(secs) => secs * 1000.0,
        };
        if ms.is_finite() {
            Ok(ms)
        } else {
            Err(ApiError::einval("Invalid time."))
        }
    }
}

/// Rejects NUL bytes and empty paths, then resolves against `cwd`.
pub(crate) fn normalize_path(cwd: &str, p: &str) -> Result<String> {
    if p.contains('\0') {
        return Err(ApiError::einval("Path must be a string without null bytes."));
    }
    if p.is_empty() {
        return Err(ApiError::einval("Path must not be empty."));
    }
    Ok(path::resolve(cwd, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_core::ErrorCode;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn octal_strings_parse_leading_digits() {
        assert_eq!(Mode::from("755").bits_or(0o644), 0o755);
        assert_eq!(Mode::from("0644").bits_or(0), 0o644);
        assert_eq!(Mode::from("7a").bits_or(0), 0o7);
        assert_eq!(Mode::from("rwx").bits_or(0o644), 0o644);
        assert_eq!(normalize_mode(None, 0o777), 0o777);
        assert_eq!(normalize_mode(Some(Mode::Bits(0o600)), 0o777), 0o600);
    }

    #[test]
    fn times_convert_to_milliseconds() {
        assert_eq!(TimeArg::Seconds(1.5).to_ms().unwrap(), 1500.0);
        let t = UNIX_EPOCH + Duration::from_millis(2500);
        assert_eq!(TimeArg::System(t).to_ms().unwrap(), 2500.0);
        let err = TimeArg::Seconds(f64::NAN).to_ms().unwrap_err();
        assert_eq!(err.errno(), ErrorCode::Inval);
        assert!(err.message().ends_with("Invalid time."));
        assert!(TimeArg::Seconds(f64::INFINITY).to_ms().is_err());
    }

    #[test]
    fn paths_resolve_against_cwd() {
        assert_eq!(normalize_path("/home", "docs/../x/").unwrap(), "/home/x");
        assert_eq!(normalize_path("/home", "/etc").unwrap(), "/etc");
        assert_eq!(
            normalize_path("/", "").unwrap_err().message(),
            "Error: EINVAL: Path must not be empty."
        );
        assert_eq!(
            normalize_path("/", "a\0b").unwrap_err().message(),
            "Error: EINVAL: Path must be a string without null bytes."
        );
    }
}
