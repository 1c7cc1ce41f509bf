//! Directory listings as streamed JSON arrays.
//!
//! An object-mode source stream is re-encoded on the fly: entries are
//! prefixed with `[\n  ` or `,\n  `, the array is closed with `\n]`, and
//! an empty listing yields `[]`. Pause, resume, and destroy delegate to
//! the source so downstream backpressure reaches the directory reader.

use serde_json::Value;
use tokio::sync::mpsc;
use vfsbridge_vfs::{Chunk, StreamEvent, VfsStream};

/// Encodes a full entry list the way the stream encoder does. The
/// reference implementation for tests and buffered callers.
pub fn encode_entries(entries: &[Value]) -> String {
    if entries.is_empty() {
        return "[]".to_string();
    }
    let mut out = String::from("[\n  ");
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(",\n  ");
        }
        out.push_str(&entry.to_string());
    }
    out.push_str("\n]");
    out
}

/// A byte stream produced by JSON-encoding an object-mode source stream.
pub struct JsonArrayStream {
    source: Box<dyn VfsStream>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

impl JsonArrayStream {
    /// Wraps an object-mode stream.
    pub fn new(mut source: Box<dyn VfsStream>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(mut src) = source.take_events() {
            tokio::spawn(async move {
                let mut first = true;
                let mut closed = false;
                while let Some(event) = src.recv().await {
                    match event {
                        StreamEvent::Data(Chunk::Object(value)) => {
                            let prefix = if first { "[\n  " } else { ",\n  " };
                            first = false;
                            let encoded = format!("{}{}", prefix, value);
                            if tx
                                .send(StreamEvent::Data(Chunk::Bytes(encoded.into_bytes())))
                                .is_err()
                            {
                                break;
                            }
                        }
                        // Byte chunks in an object-mode stream pass through.
                        StreamEvent::Data(chunk) => {
                            if tx.send(StreamEvent::Data(chunk)).is_err() {
                                break;
                            }
                        }
                        StreamEvent::End(_) | StreamEvent::Close => {
                            if !closed {
                                closed = true;
                                let closing = if first { "[]" } else { "\n]" };
                                let _ = tx.send(StreamEvent::Data(Chunk::text(closing)));
                            }
                            let terminal = matches!(event, StreamEvent::Close);
                            let _ = tx.send(if terminal {
                                StreamEvent::Close
                            } else {
                                StreamEvent::End(None)
                            });
                            if terminal {
                                break;
                            }
                        }
                        other => {
                            if tx.send(other).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        Self {
            source,
            events: Some(rx),
        }
    }
}

impl VfsStream for JsonArrayStream {
    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events.take()
    }

    fn write(&mut self, _chunk: Chunk) -> bool {
        true
    }

    fn end(&mut self, _chunk: Option<Chunk>) {}

    fn pause(&mut self) {
        self.source.pause();
    }

    fn resume(&mut self) {
        self.source.resume();
    }

    fn destroy(&mut self) {
        self.source.destroy();
    }
}
