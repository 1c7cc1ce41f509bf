//! Error codes, the VFS error type, and its wire projection.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Code attached to a VFS failure.
///
/// Named codes follow the VFS convention (`ENOENT`, `EACCES`, ...).
/// A numeric code in the 100..=999 range is an HTTP status the gateway
/// passes through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed request (`EBADREQUEST`).
    BadRequest,
    /// Permission denied (`EACCES`).
    Access,
    /// Target does not exist (`ENOENT`).
    NotFound,
    /// Backing service is not ready yet (`ENOTREADY`).
    NotReady,
    /// Operation misused on a directory (`EISDIR`).
    IsDirectory,
    /// Operation was given a null or missing path (`EINVALIDPATH`).
    InvalidPath,
    /// The RPC channel went away (`EDISCONNECT`).
    Disconnected,
    /// Any other named code.
    Other(String),
    /// Numeric HTTP status pass-through.
    Status(u16),
}

impl ErrorCode {
    /// Parses a named code, falling back to [`ErrorCode::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "EBADREQUEST" => ErrorCode::BadRequest,
            "EACCES" => ErrorCode::Access,
            "ENOENT" => ErrorCode::NotFound,
            "ENOTREADY" => ErrorCode::NotReady,
            "EISDIR" => ErrorCode::IsDirectory,
            "EINVALIDPATH" => ErrorCode::InvalidPath,
            "EDISCONNECT" => ErrorCode::Disconnected,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    /// The wire name of a named code, `None` for numeric codes.
    pub fn name(&self) -> Option<&str> {
        match self {
            ErrorCode::BadRequest => Some("EBADREQUEST"),
            ErrorCode::Access => Some("EACCES"),
            ErrorCode::NotFound => Some("ENOENT"),
            ErrorCode::NotReady => Some("ENOTREADY"),
            ErrorCode::IsDirectory => Some("EISDIR"),
            ErrorCode::InvalidPath => Some("EINVALIDPATH"),
            ErrorCode::Disconnected => Some("EDISCONNECT"),
            ErrorCode::Other(name) => Some(name.as_str()),
            ErrorCode::Status(_) => None,
        }
    }

    /// The numeric status of a pass-through code, `None` for named codes.
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorCode::Status(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Status(code) => write!(f, "{}", code),
            named => write!(f, "{}", named.name().unwrap_or("EUNKNOWN")),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ErrorCode::Status(code) => serializer.serialize_u16(*code),
            named => serializer.serialize_str(named.name().unwrap_or("EUNKNOWN")),
        }
    }
}

struct ErrorCodeVisitor;

impl Visitor<'_> for ErrorCodeVisitor {
    type Value = ErrorCode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a named error code or a numeric HTTP status")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<ErrorCode, E> {
        Ok(ErrorCode::from_name(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<ErrorCode, E> {
        u16::try_from(value)
            .map(ErrorCode::Status)
            .map_err(|_| E::custom(format!("status code out of range: {}", value)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<ErrorCode, E> {
        u16::try_from(value)
            .map(ErrorCode::Status)
            .map_err(|_| E::custom(format!("status code out of range: {}", value)))
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ErrorCodeVisitor)
    }
}

/// Error produced by a VFS operation or by the bridge itself.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct VfsError {
    /// Machine-readable code, when the failure has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Human-readable description.
    pub message: String,
    /// Captured standard output of a failed child process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error of a failed child process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Stack or origin trace, when the producer recorded one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl VfsError {
    /// Creates an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            stdout: None,
            stderr: None,
            stack: None,
        }
    }

    /// Creates an error with no code.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            stdout: None,
            stderr: None,
            stack: None,
        }
    }

    /// `EBADREQUEST`
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `EACCES`
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Access, message)
    }

    /// `ENOENT`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// `ENOTREADY`
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotReady, message)
    }

    /// `EISDIR`
    pub fn is_directory(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IsDirectory, message)
    }

    /// `EINVALIDPATH`
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPath, message)
    }

    /// `EDISCONNECT`
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Disconnected, message)
    }

    /// Whether the error carries the given code.
    pub fn has_code(&self, code: &ErrorCode) -> bool {
        self.code.as_ref() == Some(code)
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::Access,
            std::io::ErrorKind::InvalidInput => ErrorCode::BadRequest,
            _ => ErrorCode::Other("EIO".to_string()),
        };
        VfsError::new(code, err.to_string())
    }
}

/// Result type alias using [`VfsError`] as the error type.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Serializable projection of a [`VfsError`] sent across the RPC channel.
///
/// The `stack` field is always present and prefixed with the worker's
/// process id so a consumer can tell which end of the bridge failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// `"<pid>: "` + the producer's stack, or its message when no stack
    /// was recorded.
    pub stack: String,
    /// Machine-readable code, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Captured standard output, for process failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error, for process failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ErrorEnvelope {
    /// Projects an error for the wire, prefixing the stack with `pid`.
    pub fn from_error(pid: u32, err: &VfsError) -> Self {
        let stack = err.stack.as_deref().unwrap_or(&err.message);
        Self {
            stack: format!("{}: {}", pid, stack),
            code: err.code.clone(),
            message: Some(err.message.clone()),
            stdout: err.stdout.clone(),
            stderr: err.stderr.clone(),
        }
    }

    /// Reconstructs a [`VfsError`] from a received envelope.
    pub fn into_error(self) -> VfsError {
        VfsError {
            code: self.code,
            message: self.message.unwrap_or_else(|| self.stack.clone()),
            stdout: self.stdout,
            stderr: self.stderr,
            stack: Some(self.stack),
        }
    }
}
