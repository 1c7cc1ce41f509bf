//! End-to-end tests for the HTTP gateway: conditional reads, ranges,
//! directory streaming, uploads, command POSTs, and error pages.

use crate::harness::{collect_response_body, ScriptPartSource, ScriptStream, ScriptVfs};
use crate::memory_vfs::MemoryVfs;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use vfsbridge_gateway::{
    GatewayOutcome, HttpRequest, HttpResponse, MountConfig, ResponseBody, VfsGateway,
};
use vfsbridge_vfs::{ByteRange, Meta, Vfs};

async fn respond(gateway: &VfsGateway, req: HttpRequest) -> HttpResponse {
    match gateway.handle(req).await {
        GatewayOutcome::Response(resp) => resp,
        GatewayOutcome::Passthrough(_) => panic!("unexpected passthrough"),
    }
}

fn mounted<V: Vfs + 'static>(vfs: Arc<V>) -> VfsGateway {
    VfsGateway::new(vfs, MountConfig::new("/m/"))
}

#[tokio::test]
async fn head_of_file_reports_type_and_length() {
    let vfs = Arc::new(ScriptVfs::new());
    vfs.on("readfile", "/foo", |options| {
        assert!(options.head);
        let mut meta = Meta::empty();
        meta.mime = Some("text/plain".to_string());
        meta.size = Some(17);
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("HEAD", "/m/foo")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert_eq!(resp.header("content-length"), Some("17"));
    assert!(collect_response_body(resp).await.is_empty());
}

#[tokio::test]
async fn directory_listing_streams_exact_json() {
    let vfs = Arc::new(ScriptVfs::new());
    vfs.on("readdir", "/d/", |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(ScriptStream::prefilled_objects(vec![
            json!({"name": "a"}),
            json!({"name": "b"}),
        ])));
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/d/")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    let body = collect_response_body(resp).await;
    assert_eq!(body, b"[\n  {\"name\":\"a\"},\n  {\"name\":\"b\"}\n]");
}

#[tokio::test]
async fn empty_directory_listing_is_empty_array() {
    let vfs = Arc::new(ScriptVfs::new());
    vfs.on("readdir", "/empty/", |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(ScriptStream::prefilled_objects(vec![])));
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/empty/")).await;
    let body = collect_response_body(resp).await;
    assert_eq!(body, b"[]");
}

#[tokio::test]
async fn range_request_yields_partial_content() {
    let vfs = Arc::new(ScriptVfs::new());
    vfs.on("readfile", "/f", |options| {
        let range = options.range.expect("range parsed from header");
        assert_eq!(range.start, Some(10));
        assert_eq!(range.end, Some(19));
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(ScriptStream::prefilled(b"0123456789".to_vec())));
        meta.size = Some(10);
        meta.partial_content = Some(ByteRange {
            start: 10,
            end: 19,
            size: 100,
        });
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let req = HttpRequest::new("GET", "/m/f").with_header("Range", "bytes=10-19");
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 206);
    assert_eq!(resp.header("content-range"), Some("bytes 10-19/100"));
    assert_eq!(resp.header("content-length"), Some("10"));
}

#[tokio::test]
async fn oversized_stream_is_refused_and_destroyed() {
    let vfs = Arc::new(ScriptVfs::new());
    let stream = ScriptStream::readable();
    let state = stream.state();
    vfs.on("readfile", "/big", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        meta.size = Some(9 * 1024 * 1024);
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/big")).await;
    assert_eq!(resp.status, 513);
    let body = collect_response_body(resp).await;
    assert_eq!(
        body,
        b"File size is bigger than allowed (8MB). Size is 9437184 bytes\n"
    );
    assert!(state.destroyed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn post_rename_moves_the_file() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/b", b"contents");
    let gateway = mounted(vfs.clone());
    let req = HttpRequest::new("POST", "/m/a").with_body(b"{\"renameFrom\":\"/b\"}".to_vec());
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert!(matches!(resp.body, ResponseBody::Empty));
    assert!(!vfs.has_file("/b"));
    assert_eq!(vfs.file("/a").unwrap(), b"contents");
}

#[tokio::test]
async fn put_and_get_round_trip() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = mounted(vfs.clone());

    let req = HttpRequest::new("PUT", "/m/notes.txt")
        .with_header("Content-Length", "5")
        .with_body(b"hello".to_vec());
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 201);
    assert_eq!(vfs.file("/notes.txt").unwrap(), b"hello");

    let resp = respond(&gateway, HttpRequest::new("GET", "/m/notes.txt")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert!(resp.header("etag").is_some());
    let body = collect_response_body(resp).await;
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn put_trailing_slash_creates_directory() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = mounted(vfs.clone());
    let resp = respond(&gateway, HttpRequest::new("PUT", "/m/newdir/")).await;
    assert_eq!(resp.status, 201);
    assert!(vfs.has_dir("/newdir/"));
}

#[tokio::test]
async fn matching_etag_yields_304() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/a.txt", b"hello");
    let gateway = mounted(vfs);

    let first = respond(&gateway, HttpRequest::new("GET", "/m/a.txt")).await;
    let etag = first.header("etag").unwrap().to_string();

    let req = HttpRequest::new("GET", "/m/a.txt").with_header("If-None-Match", &etag);
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 304);
    assert_eq!(resp.header("etag"), Some(etag.as_str()));
    assert!(collect_response_body(resp).await.is_empty());
}

#[tokio::test]
async fn auto_index_serves_index_file() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/site/index.html", b"<html></html>");
    let gateway = VfsGateway::new(
        vfs,
        MountConfig::new("/m/").with_auto_index("index.html"),
    );
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/site/")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/html"));
    let body = collect_response_body(resp).await;
    assert_eq!(body, b"<html></html>");
}

#[tokio::test]
async fn auto_index_falls_back_to_listing() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/docs/readme", b"x");
    let gateway = VfsGateway::new(
        vfs,
        MountConfig::new("/m/").with_auto_index("index.html"),
    );
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/docs/")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    let body = collect_response_body(resp).await;
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "readme");
}

#[tokio::test]
async fn no_mime_moves_type_to_side_header() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/a.txt", b"hello");
    let gateway = VfsGateway::new(vfs, MountConfig::new("/m/").without_mime());
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/a.txt")).await;
    assert_eq!(
        resp.header("content-type"),
        Some("application/octet-stream")
    );
    assert_eq!(resp.header("x-vfs-content-type"), Some("text/plain"));
}

#[tokio::test]
async fn unsatisfiable_range_is_416() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/a.txt", b"short");
    let gateway = mounted(vfs);
    let req = HttpRequest::new("GET", "/m/a.txt").with_header("Range", "bytes=100-200");
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 416);
}

#[tokio::test]
async fn multipart_upload_writes_each_part() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = mounted(vfs.clone());
    let parts = ScriptPartSource::new(vec![
        ScriptPartSource::part("one.txt", b"first".to_vec()),
        ScriptPartSource::part("two.txt", b"second".to_vec()),
    ]);
    let req = HttpRequest::new("POST", "/m/up/")
        .with_header(
            "Content-Type",
            "multipart/form-data; boundary=\"----xyz\"",
        )
        .with_multipart(Box::new(parts));
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.status, 200);
    assert_eq!(vfs.file("/up/one.txt").unwrap(), b"first");
    assert_eq!(vfs.file("/up/two.txt").unwrap(), b"second");
}

#[tokio::test]
async fn post_link_and_metadata_commands() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = mounted(vfs.clone());

    let req =
        HttpRequest::new("POST", "/m/link").with_body(b"{\"linkTo\":\"/target\"}".to_vec());
    assert_eq!(respond(&gateway, req).await.status, 200);
    assert_eq!(vfs.symlink_target("/link").as_deref(), Some("/target"));

    let req = HttpRequest::new("POST", "/m/doc")
        .with_body(b"{\"metadata\":{\"owner\":\"ada\"}}".to_vec());
    assert_eq!(respond(&gateway, req).await.status, 200);
    assert_eq!(vfs.stored_metadata("/doc").unwrap()["owner"], "ada");
}

#[tokio::test]
async fn missing_file_is_an_error_page_not_a_404() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/gone")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/x-error"));
    let body = collect_response_body(resp).await;
    assert_eq!(body, b"no such file: /gone\n");
}

#[tokio::test]
async fn enoent_flag_restores_404() {
    let vfs = Arc::new(MemoryVfs::new());
    let gateway = VfsGateway::new(vfs, MountConfig::new("/m/").enoent_as_status());
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/gone")).await;
    assert_eq!(resp.status, 404);
}

#[tokio::test]
async fn client_disconnect_destroys_the_stream() {
    let vfs = Arc::new(ScriptVfs::new());
    let stream = ScriptStream::readable();
    let state = stream.state();
    vfs.on("readfile", "/slow", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        meta.size = Some(4);
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let resp = respond(&gateway, HttpRequest::new("GET", "/m/slow")).await;
    match resp.body {
        ResponseBody::Stream(mut stream) => {
            // What the embedder does when the client goes away.
            stream.destroy();
        }
        _ => panic!("expected streaming body"),
    }
    assert!(state.destroyed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn metadata_request_bundles_length_headers() {
    let vfs = Arc::new(ScriptVfs::new());
    vfs.on("readfile", "/doc", |options| {
        assert!(options.metadata);
        let mut meta = Meta::empty();
        meta.mime = Some("text/plain".to_string());
        meta.size = Some(10);
        meta.metadata_size = Some(25);
        meta.stream = Some(Box::new(ScriptStream::prefilled(b"0123456789".to_vec())));
        Ok(meta)
    });
    let gateway = mounted(vfs);
    let req = HttpRequest::new("GET", "/m/doc").with_header("X-Request-Metadata", "1");
    let resp = respond(&gateway, req).await;
    assert_eq!(resp.header("x-content-length"), Some("10"));
    assert_eq!(resp.header("x-metadata-length"), Some("25"));
}

#[tokio::test]
async fn delete_file_and_directory() {
    let vfs = Arc::new(MemoryVfs::new());
    vfs.put_file("/f", b"x");
    let gateway = mounted(vfs.clone());

    let resp = respond(&gateway, HttpRequest::new("PUT", "/m/d/")).await;
    assert_eq!(resp.status, 201);

    let resp = respond(&gateway, HttpRequest::new("DELETE", "/m/f")).await;
    assert_eq!(resp.status, 200);
    assert!(!vfs.has_file("/f"));

    let resp = respond(&gateway, HttpRequest::new("DELETE", "/m/d/")).await;
    assert_eq!(resp.status, 200);
    assert!(!vfs.has_dir("/d/"));
}
