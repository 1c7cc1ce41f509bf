//! The result object VFS operations return.

use crate::api::VfsApi;
use crate::process::{VfsProcess, VfsPty};
use crate::stream::VfsStream;
use crate::watch::VfsWatcher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A satisfied byte range: the slice served and the total entity size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte served (inclusive).
    pub start: u64,
    /// Last byte served (inclusive).
    pub end: u64,
    /// Total size of the entity the range was cut from.
    pub size: u64,
}

/// Result of a VFS operation.
///
/// Resource slots carry live handles the callback marshaller replaces with
/// tokens before the result crosses the RPC channel; everything else is a
/// scalar hint that passes through unchanged. Absent fields are dropped
/// from the wire.
#[derive(Default)]
pub struct Meta {
    /// A live stream (file contents, directory entries, socket).
    pub stream: Option<Box<dyn VfsStream>>,
    /// A live child process.
    pub process: Option<Box<dyn VfsProcess>>,
    /// A live PTY (process and stream in one).
    pub pty: Option<Box<dyn VfsPty>>,
    /// A live file-system watcher.
    pub watcher: Option<Box<dyn VfsWatcher>>,
    /// A pluggable extension API.
    pub api: Option<Box<dyn VfsApi>>,

    /// Entity tag for conditional requests.
    pub etag: Option<String>,
    /// The client's etag still matches; no body follows.
    pub not_modified: bool,
    /// The requested range was satisfied.
    pub partial_content: Option<ByteRange>,
    /// The requested range cannot be satisfied; carries the error text.
    pub range_not_satisfiable: Option<String>,
    /// Media type of the entity.
    pub mime: Option<String>,
    /// Entity size in bytes.
    pub size: Option<u64>,
    /// Size of bundled metadata, when metadata was requested.
    pub metadata_size: Option<u64>,
    /// String length of bundled metadata.
    pub metadata_string_length: Option<u64>,

    /// Scalar fields the bridge passes through without interpretation.
    pub extra: Map<String, Value>,
}

impl Meta {
    /// A result with no fields set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether any resource slot is occupied.
    pub fn has_resource(&self) -> bool {
        self.stream.is_some()
            || self.process.is_some()
            || self.pty.is_some()
            || self.watcher.is_some()
            || self.api.is_some()
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("stream", &self.stream.is_some())
            .field("process", &self.process.is_some())
            .field("pty", &self.pty.is_some())
            .field("watcher", &self.watcher.is_some())
            .field("api", &self.api.is_some())
            .field("etag", &self.etag)
            .field("not_modified", &self.not_modified)
            .field("partial_content", &self.partial_content)
            .field("range_not_satisfiable", &self.range_not_satisfiable)
            .field("mime", &self.mime)
            .field("size", &self.size)
            .field("metadata_size", &self.metadata_size)
            .field("metadata_string_length", &self.metadata_string_length)
            .field("extra", &self.extra)
            .finish()
    }
}
