//! Options passed to VFS operations.

use crate::stream::VfsStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A byte range requested by a caller. Open-ended on either side;
/// `start=None, end=Some(n)` means "the last n bytes".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    /// First byte requested (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Last byte requested (inclusive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    /// Etag the range is conditional on (`If-Range`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Options for a VFS operation. All fields default to "not requested".
#[derive(Default)]
pub struct OpOptions {
    /// Metadata-only request: no body is produced.
    pub head: bool,
    /// Etag for conditional reads (`If-None-Match`).
    pub etag: Option<String>,
    /// Byte range for partial reads.
    pub range: Option<RangeRequest>,
    /// Bundle stored metadata with the result.
    pub metadata: bool,
    /// Create missing parent directories.
    pub parents: bool,
    /// Buffer the whole write before committing it.
    pub buffer_write: bool,
    /// Source path for rename/copy.
    pub from: Option<String>,
    /// Link target for symlink.
    pub target: Option<String>,
    /// Metadata value to store.
    pub metadata_value: Option<Value>,
    /// Requested text encoding; `None` means raw bytes (and, for readdir,
    /// an object-mode entry stream).
    pub encoding: Option<String>,
    /// Input stream for write operations.
    pub stream: Option<Box<dyn VfsStream>>,
    /// Options the bridge passes through without interpretation.
    pub extra: Map<String, Value>,
}

impl OpOptions {
    /// Options with every field unset.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets `parents`.
    pub fn with_parents(mut self) -> Self {
        self.parents = true;
        self
    }

    /// Sets the input stream.
    pub fn with_stream(mut self, stream: Box<dyn VfsStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Sets the rename/copy source.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

impl fmt::Debug for OpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpOptions")
            .field("head", &self.head)
            .field("etag", &self.etag)
            .field("range", &self.range)
            .field("metadata", &self.metadata)
            .field("parents", &self.parents)
            .field("buffer_write", &self.buffer_write)
            .field("from", &self.from)
            .field("target", &self.target)
            .field("metadata_value", &self.metadata_value)
            .field("encoding", &self.encoding)
            .field("stream", &self.stream.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}
