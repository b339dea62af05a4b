use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ApiError, Result};

/// What `open` does when the path exists, or does not, for a given flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Open the existing file as-is.
    Nop,
    /// Fail (`EEXIST` when the file exists, `ENOENT` when it does not).
    ThrowException,
    /// Replace the existing file with an empty one.
    TruncateFile,
    /// Create the missing file.
    CreateFile,
}

/// One of the Node `fs.open` flag strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FileFlag {
    /// `r`
    Read,
    /// `r+`
    ReadWrite,
    /// `rs`
    ReadSync,
    /// `rs+`
    ReadWriteSync,
    /// `w`
    Write,
    /// `wx`
    WriteExclusive,
    /// `w+`
    WriteRead,
    /// `wx+`
    WriteReadExclusive,
    /// `a`
    Append,
    /// `ax`
    AppendExclusive,
    /// `a+`
    AppendRead,
    /// `ax+`
    AppendReadExclusive,
}

impl FileFlag {
    pub const ALL: [FileFlag; 12] = [
        FileFlag::Read,
        FileFlag::ReadWrite,
        FileFlag::ReadSync,
        FileFlag::ReadWriteSync,
        FileFlag::Write,
        FileFlag::WriteExclusive,
        FileFlag::WriteRead,
        FileFlag::WriteReadExclusive,
        FileFlag::Append,
        FileFlag::AppendExclusive,
        FileFlag::AppendRead,
        FileFlag::AppendReadExclusive,
    ];

    /// Parses a flag string, failing with `EINVAL` for anything else.
    pub fn get(flag: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == flag)
            .ok_or_else(|| ApiError::einval(format!("Invalid flag: {flag}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileFlag::Read => "r",
            FileFlag::ReadWrite => "r+",
            FileFlag::ReadSync => "rs",
            FileFlag::ReadWriteSync => "rs+",
            FileFlag::Write => "w",
            FileFlag::WriteExclusive => "wx",
            FileFlag::WriteRead => "w+",
            FileFlag::WriteReadExclusive => "wx+",
            FileFlag::Append => "a",
            FileFlag::AppendExclusive => "ax",
            FileFlag::AppendRead => "a+",
            FileFlag::AppendReadExclusive => "ax+",
        }
    }

    pub fn is_readable(self) -> bool {
        let s = self.as_str();
        s.contains('r') || s.contains('+')
    }

    pub fn is_writeable(self) -> bool {
        let s = self.as_str();
        s.contains('w') || s.contains('a') || s.contains('+')
    }

    pub fn is_truncating(self) -> bool {
        self.as_str().contains('w')
    }

    pub fn is_appendable(self) -> bool {
        self.as_str().contains('a')
    }

    pub fn is_synchronous(self) -> bool {
        self.as_str().contains('s')
    }

    pub fn is_exclusive(self) -> bool {
        self.as_str().contains('x')
    }

    pub fn path_exists_action(self) -> ActionType {
        if self.is_exclusive() {
            ActionType::ThrowException
        } else if self.is_truncating() {
            ActionType::TruncateFile
        } else {
            ActionType::Nop
        }
    }

    pub fn path_not_exists_action(self) -> ActionType {
        if (self.is_writeable() || self.is_appendable()) && self != FileFlag::ReadWrite {
            ActionType::CreateFile
        } else {
            ActionType::ThrowException
        }
    }
}

impl FromStr for FileFlag {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::get(s)
    }
}

impl TryFrom<String> for FileFlag {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self> {
        Self::get(&value)
    }
}

impl From<FileFlag> for String {
    fn from(flag: FileFlag) -> Self {
        flag.as_str().to_owned()
    }
}

impl fmt::Display for FileFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
