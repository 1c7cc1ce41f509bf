//! Error normalization: VFS codes to HTTP status and error pages.

use crate::config::MountConfig;
use crate::http::HttpResponse;
use std::sync::Arc;
use vfsbridge_vfs::{ErrorCode, VfsError};

/// Override hook for the default error mapping.
pub type ErrorHandler = Arc<dyn Fn(&VfsError) -> HttpResponse + Send + Sync>;

/// Maps a VFS error to an HTTP status.
///
/// `ENOENT` maps to 200 when `enoent_as_error_page` is set: the client
/// inspects the `text/x-error` content type instead of the status. A
/// numeric code in 100..=999 passes through unchanged.
pub fn status_for(err: &VfsError, config: &MountConfig) -> u16 {
    match &err.code {
        Some(ErrorCode::BadRequest) => 400,
        Some(ErrorCode::Access) => 403,
        Some(ErrorCode::NotFound) => {
            if config.enoent_as_error_page {
                200
            } else {
                404
            }
        }
        Some(ErrorCode::NotReady) => 503,
        Some(ErrorCode::IsDirectory) => 503,
        Some(ErrorCode::Status(code)) if (100..=999).contains(code) => *code,
        _ => 500,
    }
}

/// Builds the error page: `text/x-error`, body `message + "\n"`.
pub fn error_response(err: &VfsError, config: &MountConfig) -> HttpResponse {
    HttpResponse::new(status_for(err, config))
        .with_header("Content-Type", "text/x-error")
        .with_body(format!("{}\n", err.message).into_bytes())
}
