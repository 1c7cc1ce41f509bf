//! Gateway mount configuration.

use serde::{Deserialize, Serialize};

/// Options for one mounted VFS prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// URL prefix the VFS is exposed under. Always ends in `/`.
    pub mount: String,
    /// Forward every non-GET/HEAD request to the next handler.
    pub read_only: bool,
    /// File name tried before falling back to a directory listing on
    /// `/`-terminated GETs.
    pub auto_index: Option<String>,
    /// Serve `application/octet-stream` and move the real media type to
    /// `X-VFS-Content-Type`.
    pub no_mime: bool,
    /// Map `ENOENT` to a 200 `text/x-error` page instead of 404.
    pub enoent_as_error_page: bool,
}

impl MountConfig {
    /// A mount at `prefix`, normalized to end in `/`.
    pub fn new(prefix: &str) -> Self {
        let mut mount = prefix.to_string();
        if !mount.ends_with('/') {
            mount.push('/');
        }
        Self {
            mount,
            read_only: false,
            auto_index: None,
            no_mime: false,
            enoent_as_error_page: true,
        }
    }

    /// Marks the mount read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the auto-index file name.
    pub fn with_auto_index(mut self, name: &str) -> Self {
        self.auto_index = Some(name.to_string());
        self
    }

    /// Suppresses media types in `Content-Type`.
    pub fn without_mime(mut self) -> Self {
        self.no_mime = true;
        self
    }

    /// Maps `ENOENT` to 404 instead of the 200 error page.
    pub fn enoent_as_status(mut self) -> Self {
        self.enoent_as_error_page = false;
        self
    }

    /// Maps a request path to a VFS path, or `None` when the request does
    /// not fall under this mount. The remainder keeps one leading `/`:
    /// mount `/m/` turns `/m/foo` into `/foo` and `/m/d/` into `/d/`.
    pub fn vfs_path(&self, request_path: &str) -> Option<String> {
        if !request_path.starts_with(&self.mount) {
            return None;
        }
        Some(request_path[self.mount.len() - 1..].to_string())
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self::new("/")
    }
}
