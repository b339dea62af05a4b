//! Errno-flavoured error type shared by every backend.
//!
//! [`ApiError`] is the single error value that crosses backend, facade and
//! worker boundaries. Its numeric [`ErrorCode`] is stable, so the JSON and
//! length-prefixed buffer encodings produced here can be decoded by a peer
//! that only knows the errno table.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// POSIX errno subset understood by the file system layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Perm = 1,
    Noent = 2,
    Io = 5,
    Badf = 9,
    Access = 13,
    Busy = 16,
    Exist = 17,
    Notdir = 20,
    Isdir = 21,
    Inval = 22,
    Fbig = 27,
    Nospc = 28,
    Rofs = 30,
    Notempty = 39,
    Notsup = 95,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 15] = [
        ErrorCode::Perm,
        ErrorCode::Noent,
        ErrorCode::Io,
        ErrorCode::Badf,
        ErrorCode::Access,
        ErrorCode::Busy,
        ErrorCode::Exist,
        ErrorCode::Notdir,
        ErrorCode::Isdir,
        ErrorCode::Inval,
        ErrorCode::Fbig,
        ErrorCode::Nospc,
        ErrorCode::Rofs,
        ErrorCode::Notempty,
        ErrorCode::Notsup,
    ];

    #[inline]
    pub fn errno(self) -> u16 {
        self as u16
    }

    pub fn from_errno(errno: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| i64::from(c.errno()) == errno)
    }

    /// Symbolic name, e.g. `"ENOENT"`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Perm => "EPERM",
            ErrorCode::Noent => "ENOENT",
            ErrorCode::Io => "EIO",
            ErrorCode::Badf => "EBADF",
            ErrorCode::Access => "EACCES",
            ErrorCode::Busy => "EBUSY",
            ErrorCode::Exist => "EEXIST",
            ErrorCode::Notdir => "ENOTDIR",
            ErrorCode::Isdir => "EISDIR",
            ErrorCode::Inval => "EINVAL",
            ErrorCode::Fbig => "EFBIG",
            ErrorCode::Nospc => "ENOSPC",
            ErrorCode::Rofs => "EROFS",
            ErrorCode::Notempty => "ENOTEMPTY",
            ErrorCode::Notsup => "ENOTSUP",
        }
    }

    /// Default human readable description used when no message is given.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Perm => "Operation not permitted.",
            ErrorCode::Noent => "No such file or directory.",
            ErrorCode::Io => "Input/output error.",
            ErrorCode::Badf => "Bad file descriptor.",
            ErrorCode::Access => "Permission denied.",
            ErrorCode::Busy => "Resource busy or locked.",
            ErrorCode::Exist => "File exists.",
            ErrorCode::Notdir => "File is not a directory.",
            ErrorCode::Isdir => "File is a directory.",
            ErrorCode::Inval => "Invalid argument.",
            ErrorCode::Fbig => "File is too big.",
            ErrorCode::Nospc => "No space left on disk.",
            ErrorCode::Rofs => "Cannot modify a read-only file system.",
            ErrorCode::Notempty => "Directory is not empty.",
            ErrorCode::Notsup => "Operation is not supported.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a file system operation.
///
/// The rendered message follows the Node convention
/// `Error: ENOENT: No such file or directory., '/missing'`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    errno: ErrorCode,
    path: Option<String>,
    message: String,
    stack: String,
}

impl ApiError {
    pub fn new(errno: ErrorCode, description: impl AsRef<str>, path: Option<&str>) -> Self {
        let message = match path {
            Some(p) => format!("Error: {}: {}, '{p}'", errno.as_str(), description.as_ref()),
            None => format!("Error: {}: {}", errno.as_str(), description.as_ref()),
        };
        Self {
            errno,
            path: path.map(str::to_owned),
            stack: message.clone(),
            message,
        }
    }

    /// Error carrying only the errno's default description.
    pub fn from_code(errno: ErrorCode) -> Self {
        Self::new(errno, errno.description(), None)
    }

    pub fn with_message(errno: ErrorCode, description: impl AsRef<str>) -> Self {
        Self::new(errno, description, None)
    }

    /// Error naming the offending path with the errno's default description.
    pub fn file_error(errno: ErrorCode, path: &str) -> Self {
        Self::new(errno, errno.description(), Some(path))
    }

    pub fn enoent(path: &str) -> Self {
        Self::file_error(ErrorCode::Noent, path)
    }

    pub fn eexist(path: &str) -> Self {
        Self::file_error(ErrorCode::Exist, path)
    }

    pub fn eisdir(path: &str) -> Self {
        Self::file_error(ErrorCode::Isdir, path)
    }

    pub fn enotdir(path: &str) -> Self {
        Self::file_error(ErrorCode::Notdir, path)
    }

    pub fn eperm(path: &str) -> Self {
        Self::file_error(ErrorCode::Perm, path)
    }

    pub fn enotempty(path: &str) -> Self {
        Self::file_error(ErrorCode::Notempty, path)
    }

    pub fn ebusy(path: &str) -> Self {
        Self::file_error(ErrorCode::Busy, path)
    }

    pub fn einval(description: impl AsRef<str>) -> Self {
        Self::with_message(ErrorCode::Inval, description)
    }

    pub fn eio(description: impl AsRef<str>) -> Self {
        Self::with_message(ErrorCode::Io, description)
    }

    pub fn enotsup() -> Self {
        Self::from_code(ErrorCode::Notsup)
    }

    pub fn errno(&self) -> ErrorCode {
        self.errno
    }

    pub fn code(&self) -> &'static str {
        self.errno.as_str()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Rewrites the path this error refers to, e.g. when a mounted backend's
    /// local path has to be reported in the caller's namespace. Only the
    /// quoted path suffix of the message is touched.
    pub fn with_path_rewritten(mut self, local: &str, visible: &str) -> Self {
        let quoted = format!("'{local}'");
        if let Some(idx) = self.message.rfind(&quoted) {
            self.message = format!(
                "{}'{visible}'{}",
                &self.message[..idx],
                &self.message[idx + quoted.len()..]
            );
            self.stack = self.message.clone();
            self.path = Some(visible.to_owned());
        } else if self.path.as_deref() == Some(local) {
            self.path = Some(visible.to_owned());
        }
        self
    }

    pub fn to_json(&self) -> WireError {
        WireError {
            errno: i64::from(self.errno.errno()),
            code: self.code().to_owned(),
            path: self.path.clone(),
            stack: self.stack.clone(),
            message: self.message.clone(),
        }
    }

    /// Rebuilds an error from its JSON form. Unknown errno values become
    /// `EIO` but keep the peer's message and stack.
    pub fn from_json(json: WireError) -> Self {
        let errno = ErrorCode::from_errno(json.errno).unwrap_or(ErrorCode::Io);
        Self {
            errno,
            path: json.path,
            message: json.message,
            stack: json.stack,
        }
    }

    /// Number of bytes [`write_to_buffer`](Self::write_to_buffer) produces.
    pub fn buffer_size(&self) -> usize {
        4 + self.json_bytes().len()
    }

    /// Encodes the error as `u32 LE length` followed by the UTF-8 JSON.
    pub fn write_to_buffer(&self) -> Vec<u8> {
        let json = self.json_bytes();
        let mut out = Vec::with_capacity(4 + json.len());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&json);
        out
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let header: [u8; 4] = buffer
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ApiError::eio("Error buffer is shorter than its length prefix."))?;
        let len = u32::from_le_bytes(header) as usize;
        let body = buffer
            .get(4..4 + len)
            .ok_or_else(|| ApiError::eio("Error buffer is shorter than its declared length."))?;
        let json: WireError = serde_json::from_slice(body)?;
        Ok(Self::from_json(json))
    }

    fn json_bytes(&self) -> Vec<u8> {
        // A struct of plain strings and integers always serializes.
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }
}

/// JSON shape of an [`ApiError`] on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub errno: i64,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub stack: String,
    pub message: String,
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        let errno = match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::Noent,
            io::ErrorKind::PermissionDenied => ErrorCode::Access,
            io::ErrorKind::AlreadyExists => ErrorCode::Exist,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorCode::Inval,
            io::ErrorKind::Unsupported => ErrorCode::Notsup,
            _ => ErrorCode::Io,
        };
        ApiError::with_message(errno, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::eio(err.to_string())
    }
}

impl From<ApiError> for io::Error {
    fn from(err: ApiError) -> Self {
        let kind = match err.errno {
            ErrorCode::Noent => io::ErrorKind::NotFound,
            ErrorCode::Access | ErrorCode::Perm => io::ErrorKind::PermissionDenied,
            ErrorCode::Exist => io::ErrorKind::AlreadyExists,
            ErrorCode::Inval => io::ErrorKind::InvalidInput,
            ErrorCode::Notsup => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn message_names_code_and_path() {
        let err = ApiError::enoent("/missing");
        assert_eq!(err.errno(), ErrorCode::Noent);
        assert_eq!(err.path(), Some("/missing"));
        assert_eq!(
            err.to_string(),
            "Error: ENOENT: No such file or directory., '/missing'"
        );
    }

    #[test]
    fn buffer_encoding_is_length_prefixed_json() {
        let err = ApiError::eexist("/a");
        let buf = err.write_to_buffer();
        assert_eq!(buf.len(), err.buffer_size());

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
        let json: serde_json::Value = serde_json::from_slice(&buf[4..]).unwrap();
        assert_eq!(json["errno"], 17);
        assert_eq!(json["code"], "EEXIST");
        assert_eq!(json["path"], "/a");

        let back = ApiError::from_buffer(&buf).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn unknown_errno_decodes_as_eio_with_original_message() {
        let wire = WireError {
            errno: 4242,
            code: "EWHAT".into(),
            path: None,
            stack: String::new(),
            message: "custom failure".into(),
        };
        let err = ApiError::from_json(wire);
        assert_eq!(err.errno(), ErrorCode::Io);
        assert_eq!(err.message(), "custom failure");
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let err = ApiError::from_code(ErrorCode::Badf);
        let buf = err.write_to_buffer();
        let short = ApiError::from_buffer(&buf[..buf.len() - 1]).unwrap_err();
        assert_eq!(short.errno(), ErrorCode::Io);
    }

    #[test]
    fn path_rewrite_updates_message_and_path() {
        let err = ApiError::enoent("/file").with_path_rewritten("/file", "/mnt/file");
        assert_eq!(err.path(), Some("/mnt/file"));
        assert!(err.message().ends_with("'/mnt/file'"));

        let io = ApiError::new(ErrorCode::Io, "Input/output error.", Some("/"))
            .with_path_rewritten("/", "/mnt");
        assert_eq!(io.message(), "Error: EIO: Input/output error., '/mnt'");
    }
}
