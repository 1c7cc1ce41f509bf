//! Multipart upload contract and header parsing.
//!
//! The multipart parser itself lives with the embedder; it feeds the
//! gateway framed parts with headers and a byte stream body through
//! [`PartSource`]. The helpers here extract the boundary from a
//! `Content-Type` and the upload file name from a `Content-Disposition`.

use async_trait::async_trait;
use std::collections::HashMap;
use vfsbridge_vfs::VfsStream;

/// One framed part of a multipart body.
pub struct MultipartPart {
    /// Part headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// Part body.
    pub body: Box<dyn VfsStream>,
}

impl MultipartPart {
    /// File name from the part's `Content-Disposition`, if present.
    pub fn filename(&self) -> Option<String> {
        self.headers
            .get("content-disposition")
            .and_then(|d| parse_disposition_name(d))
    }
}

/// Source of parsed multipart parts.
#[async_trait]
pub trait PartSource: Send {
    /// The next part, or `None` when the body is exhausted.
    async fn next_part(&mut self) -> Option<MultipartPart>;
}

/// Extracts the boundary parameter from a multipart `Content-Type`.
/// Accepts both `boundary="..."` and bare `boundary=...`.
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let idx = content_type.find("boundary=")?;
    let rest = &content_type[idx + "boundary=".len()..];
    let boundary = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        rest.split(';').next()?.trim()
    };
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// Extracts the upload name from a `Content-Disposition` header:
/// `filename="..."` wins over `name="..."`; bare values are accepted.
pub fn parse_disposition_name(disposition: &str) -> Option<String> {
    for key in ["filename=", "name="] {
        if let Some(idx) = disposition.find(key) {
            let rest = &disposition[idx + key.len()..];
            let value = if let Some(quoted) = rest.strip_prefix('"') {
                quoted.split('"').next()?
            } else {
                rest.split(';').next()?.trim()
            };
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
