//! RESTful HTTP gateway for the vfsbridge access bridge.
//!
//! Maps HTTP verbs onto the VFS contract under a mount prefix: GET/HEAD
//! with range, etag, and conditional semantics; PUT/DELETE for files and
//! directories; POST for multipart upload and rename/copy/symlink/metadata
//! commands; PROPFIND for stat. Directory listings stream as JSON arrays.
//!
//! The HTTP server beneath is the embedder's concern: requests arrive as
//! [`HttpRequest`] values and leave as [`HttpResponse`] values whose body
//! may be a live stream.

pub mod config;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod http;
pub mod json_stream;
pub mod multipart;

pub use config::MountConfig;
pub use error::{error_response, status_for, ErrorHandler};
pub use gateway::{GatewayOutcome, VfsGateway};
pub use headers::parse_byte_range;
pub use http::{HttpRequest, HttpResponse, RequestBody, ResponseBody, StaticStream};
pub use json_stream::{encode_entries, JsonArrayStream};
pub use multipart::{parse_boundary, parse_disposition_name, MultipartPart, PartSource};
