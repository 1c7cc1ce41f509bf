//! HTTP verb to VFS operation dispatch.

use crate::config::MountConfig;
use crate::error::{error_response, ErrorHandler};
use crate::headers::parse_byte_range;
use crate::http::{HttpRequest, HttpResponse, RequestBody, ResponseBody, StaticStream};
use crate::json_stream::JsonArrayStream;
use crate::multipart::parse_boundary;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use vfsbridge_vfs::{
    Chunk, ErrorCode, Meta, OpOptions, Result, StreamEvent, Vfs, VfsError, VfsStream,
};

/// Streams larger than this are refused with status 513.
const MAX_STREAM_BYTES: u64 = 8 * 1024 * 1024;

/// Uploads below this length are written with `buffer_write`.
const BUFFERED_WRITE_LIMIT: u64 = 10 * 1024 * 1024;

/// Result of offering a request to the gateway.
pub enum GatewayOutcome {
    /// The gateway handled the request.
    Response(HttpResponse),
    /// The request is not ours (wrong prefix, or a write in read-only
    /// mode); the embedder passes it to the next handler.
    Passthrough(HttpRequest),
}

/// The HTTP gateway over one mounted VFS.
pub struct VfsGateway {
    vfs: Arc<dyn Vfs>,
    config: MountConfig,
    error_handler: Option<ErrorHandler>,
}

impl VfsGateway {
    /// A gateway serving `vfs` under `config.mount`.
    pub fn new(vfs: Arc<dyn Vfs>, config: MountConfig) -> Self {
        Self {
            vfs,
            config,
            error_handler: None,
        }
    }

    /// Overrides the default error mapping.
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// The mount configuration.
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Dispatches one request.
    pub async fn handle(&self, req: HttpRequest) -> GatewayOutcome {
        let Some(path) = self.config.vfs_path(&req.path) else {
            return GatewayOutcome::Passthrough(req);
        };
        if self.config.read_only && req.method != "GET" && req.method != "HEAD" {
            return GatewayOutcome::Passthrough(req);
        }

        let method = req.method.clone();
        let result = match method.as_str() {
            "GET" => self.handle_get(&req, &path, false).await,
            "HEAD" => self.handle_get(&req, &path, true).await,
            "PUT" => {
                let length = req.content_length();
                self.handle_put(req.body, length, &path).await
            }
            "DELETE" => self.handle_delete(&path).await,
            "POST" => self.handle_post(req, &path).await,
            "PROPFIND" => self.handle_propfind(&path).await,
            _ => Ok(HttpResponse::new(501).with_text("Method not implemented\n")),
        };

        GatewayOutcome::Response(match result {
            Ok(resp) => resp,
            Err(err) => self.normalize(&path, err),
        })
    }

    fn normalize(&self, path: &str, err: VfsError) -> HttpResponse {
        if !err.has_code(&ErrorCode::NotFound) {
            warn!(path, error = %err, "request failed");
        }
        match &self.error_handler {
            Some(handler) => handler(&err),
            None => error_response(&err, &self.config),
        }
    }

    fn read_options(&self, req: &HttpRequest, head: bool) -> OpOptions {
        let mut options = OpOptions::none();
        options.head = head;
        options.etag = req.header("if-none-match").map(str::to_string);
        if let Some(header) = req.header("range") {
            if let Some(mut range) = parse_byte_range(header) {
                range.etag = req.header("if-range").map(str::to_string);
                options.range = Some(range);
            }
        }
        options.metadata = req.header("x-request-metadata").is_some();
        options
    }

    async fn handle_get(&self, req: &HttpRequest, path: &str, head: bool) -> Result<HttpResponse> {
        let mut dir_listing = false;
        let meta = if path.ends_with('/') {
            if let Some(index) = self.config.auto_index.clone() {
                let index_path = format!("{}{}", path, index);
                match self
                    .vfs
                    .readfile(&index_path, self.read_options(req, head))
                    .await
                {
                    Ok(meta) => meta,
                    Err(_) => {
                        // Recover exactly once: no index file, list the
                        // directory instead.
                        dir_listing = true;
                        self.vfs.readdir(path, self.read_options(req, head)).await?
                    }
                }
            } else {
                dir_listing = true;
                self.vfs.readdir(path, self.read_options(req, head)).await?
            }
        } else {
            self.vfs.readfile(path, self.read_options(req, head)).await?
        };
        self.respond_read(meta, head, dir_listing)
    }

    fn respond_read(&self, meta: Meta, head: bool, dir_listing: bool) -> Result<HttpResponse> {
        if let Some(text) = meta.range_not_satisfiable {
            return Ok(HttpResponse::new(416).with_body(text.into_bytes()));
        }

        let mut resp = HttpResponse::new(200);
        if let Some(etag) = &meta.etag {
            resp = resp.with_header("ETag", etag);
        }
        if meta.not_modified {
            resp.status = 304;
            return Ok(resp);
        }
        if let Some(range) = meta.partial_content {
            resp.status = 206;
            resp = resp.with_header(
                "Content-Range",
                &format!("bytes {}-{}/{}", range.start, range.end, range.size),
            );
        }

        if meta.stream.is_some() || head {
            if dir_listing {
                resp = resp.with_header("Content-Type", "application/json");
            } else {
                let mime = meta.mime.as_deref().unwrap_or("application/octet-stream");
                if self.config.no_mime {
                    resp = resp
                        .with_header("Content-Type", "application/octet-stream")
                        .with_header("X-VFS-Content-Type", mime);
                } else {
                    resp = resp.with_header("Content-Type", mime);
                }
            }
            if let Some(size) = meta.size {
                resp = resp.with_header("Content-Length", &size.to_string());
            }
            if let Some(metadata_size) = meta.metadata_size {
                if let Some(size) = meta.size {
                    resp = resp.with_header("X-Content-Length", &size.to_string());
                }
                resp = resp.with_header("X-Metadata-Length", &metadata_size.to_string());
            }
        }

        if let Some(mut stream) = meta.stream {
            if let Some(size) = meta.size {
                if size > MAX_STREAM_BYTES {
                    stream.destroy();
                    return Ok(HttpResponse::new(513).with_text(&format!(
                        "File size is bigger than allowed (8MB). Size is {} bytes\n",
                        size
                    )));
                }
            }
            if head {
                stream.destroy();
                return Ok(resp);
            }
            resp.body = if dir_listing {
                ResponseBody::Stream(Box::new(JsonArrayStream::new(stream)))
            } else {
                ResponseBody::Stream(stream)
            };
        }
        Ok(resp)
    }

    async fn handle_put(
        &self,
        body: RequestBody,
        content_length: Option<u64>,
        path: &str,
    ) -> Result<HttpResponse> {
        if path.ends_with('/') {
            self.vfs.mkdir(path, OpOptions::none().with_parents()).await?;
        } else {
            let mut options = OpOptions::none().with_parents();
            options.buffer_write = content_length.is_some_and(|len| len < BUFFERED_WRITE_LIMIT);
            options.stream = Some(request_stream(body)?);
            self.vfs.mkfile(path, options).await?;
        }
        Ok(HttpResponse::new(201))
    }

    async fn handle_delete(&self, path: &str) -> Result<HttpResponse> {
        if path.ends_with('/') {
            self.vfs.rmdir(path, OpOptions::none()).await?;
        } else {
            self.vfs.rmfile(path, OpOptions::none()).await?;
        }
        Ok(HttpResponse::new(200))
    }

    async fn handle_post(&self, req: HttpRequest, path: &str) -> Result<HttpResponse> {
        if path.ends_with('/') {
            return self.handle_upload(req, path).await;
        }

        let bytes = collect_request_bytes(req.body).await?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| VfsError::message(format!("invalid JSON body: {}", e)))?;
        let command = value
            .as_object()
            .ok_or_else(|| VfsError::message("Invalid command"))?;

        if let Some(from) = command.get("renameFrom").and_then(Value::as_str) {
            self.vfs.rename(path, OpOptions::none().with_from(from)).await?;
        } else if let Some(from) = command.get("copyFrom").and_then(Value::as_str) {
            self.vfs.copy(path, OpOptions::none().with_from(from)).await?;
        } else if let Some(target) = command.get("linkTo").and_then(Value::as_str) {
            let mut options = OpOptions::none();
            options.target = Some(target.to_string());
            self.vfs.symlink(path, options).await?;
        } else if let Some(metadata) = command.get("metadata") {
            let mut options = OpOptions::none();
            options.metadata_value = Some(metadata.clone());
            self.vfs.metadata(path, options).await?;
        } else {
            return Err(VfsError::message("Invalid command"));
        }
        Ok(HttpResponse::new(200).with_header("Content-Type", "text/plain"))
    }

    async fn handle_upload(&self, req: HttpRequest, path: &str) -> Result<HttpResponse> {
        let content_type = req
            .header("content-type")
            .map(str::to_string)
            .ok_or_else(|| VfsError::bad_request("missing Content-Type header"))?;
        if !content_type.contains("multipart") {
            return Err(VfsError::bad_request("Content-Type is not multipart"));
        }
        if parse_boundary(&content_type).is_none() {
            return Err(VfsError::bad_request("missing multipart boundary"));
        }
        let RequestBody::Multipart(mut parts) = req.body else {
            return Err(VfsError::bad_request("multipart body expected"));
        };

        while let Some(part) = parts.next_part().await {
            if !part.headers.contains_key("content-disposition") {
                return Err(VfsError::bad_request("part is missing Content-Disposition"));
            }
            let filename = part
                .filename()
                .ok_or_else(|| VfsError::bad_request("part is missing a file name"))?;
            let target = format!("{}{}", path, filename);
            let mut options = OpOptions::none();
            options.stream = Some(part.body);
            self.vfs.mkfile(&target, options).await?;
        }
        Ok(HttpResponse::new(200).with_header("Content-Type", "text/plain"))
    }

    async fn handle_propfind(&self, path: &str) -> Result<HttpResponse> {
        let meta = self.vfs.stat(path, OpOptions::none()).await?;
        let body = meta_to_json(&meta).to_string();
        Ok(HttpResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(body.into_bytes()))
    }
}

fn request_stream(body: RequestBody) -> Result<Box<dyn VfsStream>> {
    match body {
        RequestBody::Empty => Ok(Box::new(StaticStream::new(Vec::new()))),
        RequestBody::Bytes(bytes) => Ok(Box::new(StaticStream::new(bytes))),
        RequestBody::Stream(stream) => Ok(stream),
        RequestBody::Multipart(_) => Err(VfsError::bad_request("unexpected multipart body")),
    }
}

async fn collect_request_bytes(body: RequestBody) -> Result<Vec<u8>> {
    match body {
        RequestBody::Empty => Ok(Vec::new()),
        RequestBody::Bytes(bytes) => Ok(bytes),
        RequestBody::Stream(mut stream) => {
            let mut out = Vec::new();
            let Some(mut events) = stream.take_events() else {
                return Ok(out);
            };
            while let Some(event) = events.recv().await {
                match event {
                    StreamEvent::Data(Chunk::Bytes(bytes)) => out.extend(bytes),
                    StreamEvent::Data(Chunk::Object(value)) => {
                        out.extend(value.to_string().into_bytes())
                    }
                    StreamEvent::End(Some(Chunk::Bytes(bytes))) => {
                        out.extend(bytes);
                        break;
                    }
                    StreamEvent::End(_) | StreamEvent::Close => break,
                    StreamEvent::Error(err) => return Err(err),
                    StreamEvent::Drain => {}
                }
            }
            Ok(out)
        }
        RequestBody::Multipart(_) => Err(VfsError::bad_request("unexpected multipart body")),
    }
}

fn meta_to_json(meta: &Meta) -> Value {
    let mut object = meta.extra.clone();
    if let Some(etag) = &meta.etag {
        object.insert("etag".to_string(), Value::from(etag.clone()));
    }
    if let Some(mime) = &meta.mime {
        object.insert("mime".to_string(), Value::from(mime.clone()));
    }
    if let Some(size) = meta.size {
        object.insert("size".to_string(), Value::from(size));
    }
    Value::Object(object)
}
