//! An in-memory VFS for end-to-end gateway tests.

use crate::harness::{collect_stream_bytes, ScriptStream};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use vfsbridge_vfs::{ByteRange, Meta, OpOptions, Result, Vfs, VfsError};

fn guess_mime(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("txt") => "text/plain",
        Some("html") => "text/html",
        Some("json") => "application/json",
        Some("js") => "application/javascript",
        _ => "application/octet-stream",
    }
}

fn compute_etag(bytes: &[u8]) -> String {
    let sum: u64 = bytes.iter().map(|b| *b as u64).sum();
    format!("\"{}-{:x}\"", bytes.len(), sum)
}

/// A VFS over an in-memory file map. Supports the read path (etags,
/// ranges, head, directory listings), the write path (mkfile from a
/// stream, mkdir, delete), and the POST commands.
#[derive(Default)]
pub struct MemoryVfs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    metadata: Mutex<HashMap<String, Value>>,
    symlinks: Mutex<HashMap<String, String>>,
}

impl MemoryVfs {
    /// An empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file.
    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }

    /// Whether a file exists.
    pub fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    /// A file's contents.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// Whether a directory was created.
    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    /// The recorded target of a symlink.
    pub fn symlink_target(&self, path: &str) -> Option<String> {
        self.symlinks.lock().unwrap().get(path).cloned()
    }

    /// Stored metadata for a path.
    pub fn stored_metadata(&self, path: &str) -> Option<Value> {
        self.metadata.lock().unwrap().get(path).cloned()
    }

    fn list_entries(&self, dir: &str) -> Vec<Value> {
        let files = self.files.lock().unwrap();
        let mut entries = Vec::new();
        for (path, bytes) in files.iter() {
            if let Some(rest) = path.strip_prefix(dir) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(json!({"name": rest, "size": bytes.len()}));
                }
            }
        }
        entries
    }
}

#[async_trait]
impl Vfs for MemoryVfs {
    async fn readfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        let bytes = self
            .file(path)
            .ok_or_else(|| VfsError::not_found(format!("no such file: {}", path)))?;
        let etag = compute_etag(&bytes);
        let mut meta = Meta::empty();
        meta.etag = Some(etag.clone());

        if options.etag.as_deref() == Some(etag.as_str()) {
            meta.not_modified = true;
            return Ok(meta);
        }

        meta.mime = Some(guess_mime(path).to_string());
        let total = bytes.len() as u64;

        let mut body = bytes;
        if let Some(range) = &options.range {
            let range_valid = range
                .etag
                .as_deref()
                .map_or(true, |conditional| conditional == etag);
            if range_valid {
                let (start, end) = match (range.start, range.end) {
                    (Some(start), Some(end)) => (start, end.min(total.saturating_sub(1))),
                    (Some(start), None) => (start, total.saturating_sub(1)),
                    (None, Some(suffix)) => {
                        let start = total.saturating_sub(suffix);
                        (start, total.saturating_sub(1))
                    }
                    (None, None) => (0, total.saturating_sub(1)),
                };
                if start >= total {
                    meta.range_not_satisfiable =
                        Some("Requested range not satisfiable".to_string());
                    return Ok(meta);
                }
                body = body[start as usize..=end as usize].to_vec();
                meta.partial_content = Some(ByteRange {
                    start,
                    end,
                    size: total,
                });
            }
        }

        meta.size = Some(body.len() as u64);
        if options.metadata {
            if let Some(stored) = self.stored_metadata(path) {
                meta.metadata_size = Some(stored.to_string().len() as u64);
            }
        }
        if !options.head {
            meta.stream = Some(Box::new(ScriptStream::prefilled(body)));
        }
        Ok(meta)
    }

    async fn readdir(&self, path: &str, _options: OpOptions) -> Result<Meta> {
        let known = path == "/"
            || self.has_dir(path)
            || self
                .files
                .lock()
                .unwrap()
                .keys()
                .any(|p| p.starts_with(path));
        if !known {
            return Err(VfsError::not_found(format!("no such directory: {}", path)));
        }
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(ScriptStream::prefilled_objects(
            self.list_entries(path),
        )));
        Ok(meta)
    }

    async fn mkfile(&self, path: &str, mut options: OpOptions) -> Result<Meta> {
        let stream = options
            .stream
            .take()
            .ok_or_else(|| VfsError::bad_request("mkfile requires a stream"))?;
        let bytes = collect_stream_bytes(stream).await;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes);
        Ok(Meta::empty())
    }

    async fn mkdir(&self, path: &str, _options: OpOptions) -> Result<Meta> {
        self.dirs.lock().unwrap().insert(path.to_string());
        Ok(Meta::empty())
    }

    async fn mkdirp(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.mkdir(path, options).await
    }

    async fn rmfile(&self, path: &str, _options: OpOptions) -> Result<Meta> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .ok_or_else(|| VfsError::not_found(format!("no such file: {}", path)))?;
        Ok(Meta::empty())
    }

    async fn rmdir(&self, path: &str, _options: OpOptions) -> Result<Meta> {
        if !self.dirs.lock().unwrap().remove(path) {
            return Err(VfsError::not_found(format!("no such directory: {}", path)));
        }
        let mut files = self.files.lock().unwrap();
        files.retain(|p, _| !p.starts_with(path));
        Ok(Meta::empty())
    }

    async fn rename(&self, path: &str, options: OpOptions) -> Result<Meta> {
        let from = options
            .from
            .ok_or_else(|| VfsError::bad_request("rename requires a source"))?;
        let bytes = self
            .files
            .lock()
            .unwrap()
            .remove(&from)
            .ok_or_else(|| VfsError::not_found(format!("no such file: {}", from)))?;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes);
        Ok(Meta::empty())
    }

    async fn copy(&self, path: &str, options: OpOptions) -> Result<Meta> {
        let from = options
            .from
            .ok_or_else(|| VfsError::bad_request("copy requires a source"))?;
        let bytes = self
            .file(&from)
            .ok_or_else(|| VfsError::not_found(format!("no such file: {}", from)))?;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes);
        Ok(Meta::empty())
    }

    async fn symlink(&self, path: &str, options: OpOptions) -> Result<Meta> {
        let target = options
            .target
            .ok_or_else(|| VfsError::bad_request("symlink requires a target"))?;
        self.symlinks
            .lock()
            .unwrap()
            .insert(path.to_string(), target);
        Ok(Meta::empty())
    }

    async fn metadata(&self, path: &str, options: OpOptions) -> Result<Meta> {
        if let Some(value) = options.metadata_value {
            self.metadata
                .lock()
                .unwrap()
                .insert(path.to_string(), value);
            return Ok(Meta::empty());
        }
        let mut meta = Meta::empty();
        if let Some(stored) = self.stored_metadata(path) {
            meta.extra.insert("metadata".to_string(), stored);
        }
        Ok(meta)
    }

    async fn stat(&self, path: &str, _options: OpOptions) -> Result<Meta> {
        let bytes = self
            .file(path)
            .ok_or_else(|| VfsError::not_found(format!("no such file: {}", path)))?;
        let mut meta = Meta::empty();
        let name = path.rsplit('/').next().unwrap_or(path);
        meta.extra.insert("name".to_string(), Value::from(name));
        meta.extra
            .insert("size".to_string(), Value::from(bytes.len()));
        meta.mime = Some(guess_mime(path).to_string());
        Ok(meta)
    }
}
