//! Transport-agnostic HTTP request/response model.
//!
//! The embedder's HTTP server builds an [`HttpRequest`] (headers
//! lower-cased, body as bytes, a live stream, or pre-parsed multipart
//! parts) and writes the [`HttpResponse`] back out. A streaming response
//! body is a live [`VfsStream`]; if the client disconnects while it is
//! still readable, the embedder destroys it.

use crate::multipart::PartSource;
use std::collections::HashMap;
use tokio::sync::mpsc;
use vfsbridge_vfs::{Chunk, StreamEvent, VfsStream};

/// Body of an incoming request.
pub enum RequestBody {
    /// No body.
    Empty,
    /// Fully buffered body.
    Bytes(Vec<u8>),
    /// Streaming body.
    Stream(Box<dyn VfsStream>),
    /// Multipart body, parsed by the embedder into framed parts.
    Multipart(Box<dyn PartSource>),
}

/// An incoming request.
pub struct HttpRequest {
    /// HTTP method, upper-case.
    pub method: String,
    /// Request path (no query string).
    pub path: String,
    /// Headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: RequestBody,
}

impl HttpRequest {
    /// A bodyless request.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Adds a header (name is lower-cased).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Sets a buffered body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(body);
        self
    }

    /// Sets a streaming body.
    pub fn with_stream(mut self, stream: Box<dyn VfsStream>) -> Self {
        self.body = RequestBody::Stream(stream);
        self
    }

    /// Sets a multipart body.
    pub fn with_multipart(mut self, parts: Box<dyn PartSource>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Looks up a header by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Parses the `Content-Length` header.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

/// Body of an outgoing response.
pub enum ResponseBody {
    /// No body.
    Empty,
    /// Fully buffered body.
    Bytes(Vec<u8>),
    /// Streaming body. Destroy it if the client disconnects while it is
    /// still readable.
    Stream(Box<dyn VfsStream>),
}

/// An outgoing response.
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// An empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets a buffered body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = ResponseBody::Bytes(body);
        self
    }

    /// Sets a text body.
    pub fn with_text(self, text: &str) -> Self {
        self.with_body(text.as_bytes().to_vec())
    }

    /// Sets a streaming body.
    pub fn with_stream(mut self, stream: Box<dyn VfsStream>) -> Self {
        self.body = ResponseBody::Stream(stream);
        self
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A readable stream serving pre-loaded bytes: one data chunk, then end.
/// Used to hand buffered request bodies to stream-consuming VFS writes.
pub struct StaticStream {
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

impl StaticStream {
    /// A stream that yields `bytes` and ends.
    pub fn new(bytes: Vec<u8>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if !bytes.is_empty() {
            let _ = tx.send(StreamEvent::Data(Chunk::Bytes(bytes)));
        }
        let _ = tx.send(StreamEvent::End(None));
        let _ = tx.send(StreamEvent::Close);
        Self { events: Some(rx) }
    }
}

impl VfsStream for StaticStream {
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

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn destroy(&mut self) {
        self.events = None;
    }
}
