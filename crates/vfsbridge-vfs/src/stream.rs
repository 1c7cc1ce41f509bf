//! Stream capability: the readable/writable surface a `Meta` may carry.

use crate::error::VfsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One unit of stream payload.
///
/// File contents travel as [`Chunk::Bytes`]; object-mode streams (directory
/// listings, structured event feeds) travel as [`Chunk::Object`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Chunk {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A structured value.
    Object(Value),
}

impl Chunk {
    /// Builds a byte chunk from UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Chunk::Bytes(text.into().into_bytes())
    }

    /// Payload size in bytes; object chunks report their serialized length.
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Object(value) => value.to_string().len(),
        }
    }

    /// Whether the chunk carries no payload.
    pub fn is_empty(&self) -> bool {
        match self {
            Chunk::Bytes(bytes) => bytes.is_empty(),
            Chunk::Object(value) => value.is_null(),
        }
    }

    /// Borrows the bytes of a byte chunk.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Chunk::Bytes(bytes) => Some(bytes),
            Chunk::Object(_) => None,
        }
    }
}

/// Event emitted by a stream.
///
/// Within one stream the contract is `Data* (End | Error* Close)`: an
/// `Error` does not terminate the stream by itself, `Close` does.
#[derive(Debug)]
pub enum StreamEvent {
    /// A payload chunk arrived.
    Data(Chunk),
    /// The stream ended normally, optionally with a final chunk.
    End(Option<Chunk>),
    /// The stream is gone. Terminal; idempotent with `End`.
    Close,
    /// The stream failed. Followed eventually by `Close`.
    Error(VfsError),
    /// Writes are being accepted again after backpressure.
    Drain,
}

/// A live stream resource.
///
/// Events are delivered through a single-take receiver: the first caller of
/// [`VfsStream::take_events`] owns the event feed. Control methods
/// (`pause`, `resume`, `destroy`) stay callable on the resource itself.
pub trait VfsStream: Send {
    /// Whether the stream produces data.
    fn is_readable(&self) -> bool;

    /// Whether the stream accepts writes.
    fn is_writable(&self) -> bool;

    /// Stable identity for recognizing a stream that is already registered.
    ///
    /// Implementations backed by a shared underlying resource return the
    /// same value from every handle to it; `None` opts out of
    /// deduplication.
    fn resource_id(&self) -> Option<u64> {
        None
    }

    /// Takes the event feed. Returns `None` once already taken.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Writes a chunk. Returns `false` when the stream is not accepting
    /// more data and the caller should wait for a [`StreamEvent::Drain`].
    fn write(&mut self, chunk: Chunk) -> bool;

    /// Ends the writable side, optionally with a final chunk.
    fn end(&mut self, chunk: Option<Chunk>);

    /// Stops the readable side from producing data events.
    fn pause(&mut self);

    /// Resumes a paused readable side.
    fn resume(&mut self);

    /// Tears the stream down. The stream emits `Close` and no further data.
    fn destroy(&mut self);
}
