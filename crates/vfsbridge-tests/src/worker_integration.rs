//! End-to-end tests for the RPC worker: stream lifecycle, backpressure,
//! processes, PTYs, watchers, APIs, events, and disconnect teardown.

use crate::harness::{
    MockChannel, ScriptApi, ScriptProcess, ScriptPty, ScriptStream, ScriptVfs, ScriptWatcher,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use vfsbridge_vfs::{Chunk, ErrorCode, Meta, Vfs};
use vfsbridge_worker::{Inbound, OpKind, Outbound, StreamToken, WireOptions, Worker};

fn setup() -> (Worker, Arc<ScriptVfs>, Arc<MockChannel>) {
    let vfs = Arc::new(ScriptVfs::new());
    let channel = MockChannel::new();
    let worker = Worker::new(vfs.clone(), channel.clone());
    (worker, vfs, channel)
}

fn readfile_op(seq: u64, path: &str) -> Inbound {
    Inbound::Op {
        seq: Some(seq),
        op: OpKind::Readfile,
        path: Some(path.to_string()),
        options: WireOptions::default(),
    }
}

#[tokio::test]
async fn stream_lifecycle_end_to_end() {
    let (mut worker, vfs, channel) = setup();
    let stream = ScriptStream::readable();
    let state = stream.state();
    vfs.on("readfile", "/x", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        meta.mime = Some("x".to_string());
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(readfile_op(1, "/x"));
    worker.settle().await;

    let meta = channel.reply_meta(1).expect("reply with meta");
    let token = meta.stream.expect("stream token");
    assert!(token.readable);
    assert!(!token.writable);
    assert_eq!(meta.mime.as_deref(), Some("x"));
    let id = token.id;
    channel.take();

    // Data flows through as onData.
    state.emit_data(Chunk::text("hi"));
    worker.settle().await;
    let sent = channel.take();
    assert!(sent.iter().any(|msg| matches!(
        msg,
        Outbound::OnData { id: i, chunk: Chunk::Bytes(b) } if *i == id && b == b"hi"
    )));

    // The peer refusing data pauses the source.
    channel.refuse();
    state.emit_data(Chunk::text("more"));
    worker.settle().await;
    assert!(state.paused.load(Ordering::SeqCst));
    assert_eq!(state.pause_calls.load(Ordering::SeqCst), 1);

    // Channel drain resumes it.
    channel.accept();
    channel.take();
    handle.drain();
    worker.settle().await;
    assert!(!state.paused.load(Ordering::SeqCst));
    assert!(state.resume_calls.load(Ordering::SeqCst) >= 1);

    // End removes the handle and notifies the peer.
    state.emit_end(None);
    worker.settle().await;
    let sent = channel.take();
    assert!(sent
        .iter()
        .any(|msg| matches!(msg, Outbound::OnEnd { id: i, .. } if *i == id)));
    assert_eq!(worker.registry().stats().streams, 0);
}

#[tokio::test]
async fn ping_reports_server_time() {
    let (mut worker, _vfs, channel) = setup();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    worker.handle().deliver(Inbound::Ping {
        seq: Some(1),
        server_time: true,
    });
    worker.settle().await;
    let meta = channel.reply_meta(1).expect("ping reply");
    let elapsed = meta.extra["serverTime"].as_u64().expect("serverTime");
    assert!(elapsed >= 20);
}

#[tokio::test]
async fn store_stream_twice_mints_one_token() {
    let (mut worker, vfs, channel) = setup();
    for _ in 0..2 {
        let stream = ScriptStream::readable().with_resource(42);
        vfs.on("readfile", "/same", move |_options| {
            let mut meta = Meta::empty();
            meta.stream = Some(Box::new(stream));
            Ok(meta)
        });
    }

    let handle = worker.handle();
    handle.deliver(readfile_op(1, "/same"));
    handle.deliver(readfile_op(2, "/same"));
    worker.settle().await;

    let first = channel.reply_meta(1).unwrap().stream.unwrap();
    let second = channel.reply_meta(2).unwrap().stream.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(worker.registry().stats().streams, 1);
}

#[tokio::test]
async fn stream_error_is_forwarded_without_deleting() {
    let (mut worker, vfs, channel) = setup();
    let stream = ScriptStream::readable();
    let state = stream.state();
    vfs.on("readfile", "/x", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        Ok(meta)
    });
    let handle = worker.handle();
    handle.deliver(readfile_op(1, "/x"));
    worker.settle().await;
    let id = channel.reply_meta(1).unwrap().stream.unwrap().id;
    channel.take();

    state.emit_error(vfsbridge_vfs::VfsError::message("read failed"));
    worker.settle().await;
    let sent = channel.take();
    assert!(sent
        .iter()
        .any(|msg| matches!(msg, Outbound::OnError { id: i, .. } if *i == id)));
    // Still registered until close.
    assert_eq!(worker.registry().stats().streams, 1);

    state.emit_close();
    worker.settle().await;
    let sent = channel.take();
    assert!(sent
        .iter()
        .any(|msg| matches!(msg, Outbound::OnClose { id: i } if *i == id)));
    assert_eq!(worker.registry().stats().streams, 0);
}

#[tokio::test]
async fn no_leaks_after_disconnect() {
    let (mut worker, vfs, channel) = setup();

    let stream = ScriptStream::readable();
    let stream_state = stream.state();
    vfs.on("readfile", "/f", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        Ok(meta)
    });

    let watcher = ScriptWatcher::new();
    let watcher_state = watcher.state();
    vfs.on("watch", "/w", move |_options| {
        let mut meta = Meta::empty();
        meta.watcher = Some(Box::new(watcher));
        Ok(meta)
    });

    let stdout = ScriptStream::readable();
    let stdout_state = stdout.state();
    let process = ScriptProcess::new(100).with_stdout(stdout);
    let process_state = process.state();
    vfs.on("spawn", "/bin/sh", move |_options| {
        let mut meta = Meta::empty();
        meta.process = Some(Box::new(process));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(readfile_op(1, "/f"));
    handle.deliver(Inbound::Op {
        seq: Some(2),
        op: OpKind::Watch,
        path: Some("/w".to_string()),
        options: WireOptions::default(),
    });
    handle.deliver(Inbound::Op {
        seq: Some(3),
        op: OpKind::Spawn,
        path: Some("/bin/sh".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;
    assert_eq!(worker.registry().stats().streams, 2);
    assert_eq!(worker.registry().stats().processes, 1);
    assert_eq!(worker.registry().stats().watchers, 1);
    let _ = channel.take();

    handle.disconnect(None);
    worker.settle().await;

    let (stats, proxies) = worker.stats();
    assert!(stats.is_empty());
    assert_eq!(proxies, 0);
    assert!(process_state.killed.load(Ordering::SeqCst));
    assert!(stream_state.destroyed.load(Ordering::SeqCst));
    assert!(stdout_state.destroyed.load(Ordering::SeqCst));
    assert!(watcher_state.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unreffed_process_survives_teardown() {
    let (mut worker, vfs, _channel) = setup();
    let process = ScriptProcess::new(55);
    let state = process.state();
    vfs.on("spawn", "/task", move |_options| {
        let mut meta = Meta::empty();
        meta.process = Some(Box::new(process));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Spawn,
        path: Some("/task".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;
    handle.deliver(Inbound::Unref { pid: 55 });
    handle.disconnect(None);
    worker.settle().await;

    assert!(state.unreffed.load(Ordering::SeqCst));
    assert!(!state.killed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn messages_after_disconnect_are_no_ops() {
    let (mut worker, vfs, channel) = setup();
    let stream = ScriptStream::writable();
    vfs.on("readfile", "/s", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        Ok(meta)
    });
    let handle = worker.handle();
    handle.deliver(readfile_op(1, "/s"));
    worker.settle().await;
    let id = channel.reply_meta(1).unwrap().stream.unwrap().id;

    handle.disconnect(None);
    worker.settle().await;
    channel.take();

    handle.deliver(Inbound::Write {
        id,
        chunk: Chunk::text("late"),
    });
    handle.deliver(Inbound::Kill {
        pid: 1,
        signal: None,
    });
    handle.deliver(readfile_op(9, "/s"));
    worker.settle().await;
    assert!(channel.take().is_empty());
}

#[tokio::test]
async fn proxy_stream_feeds_vfs_write() {
    let (mut worker, vfs, channel) = setup();
    let (body_tx, body_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    vfs.on("mkfile", "/upload", move |mut options| {
        let stream = options.stream.take().expect("proxy stream");
        tokio::spawn(async move {
            let bytes = crate::harness::collect_stream_bytes(stream).await;
            let _ = body_tx.send(bytes);
        });
        Ok(Meta::empty())
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Mkfile,
        path: Some("/upload".to_string()),
        options: WireOptions {
            stream: Some(StreamToken {
                id: 7,
                readable: true,
                writable: false,
            }),
            ..Default::default()
        },
    });
    worker.settle().await;
    let (_, proxies) = worker.stats();
    assert_eq!(proxies, 1);

    handle.deliver(Inbound::OnData {
        id: 7,
        chunk: Chunk::text("part one "),
    });
    handle.deliver(Inbound::OnData {
        id: 7,
        chunk: Chunk::text("part two"),
    });
    handle.deliver(Inbound::OnEnd { id: 7, chunk: None });
    worker.settle().await;

    let body = body_rx.await.unwrap();
    assert_eq!(body, b"part one part two");
    assert!(channel.reply(1).is_some());

    // The proxy survives end and dies on close.
    let (_, proxies) = worker.stats();
    assert_eq!(proxies, 1);
    handle.deliver(Inbound::OnClose { id: 7 });
    worker.settle().await;
    let (_, proxies) = worker.stats();
    assert_eq!(proxies, 0);
}

#[tokio::test]
async fn proxy_controls_forward_to_peer() {
    let (mut worker, vfs, channel) = setup();
    vfs.on("mkfile", "/sink", move |mut options| {
        let mut stream = options.stream.take().expect("proxy stream");
        stream.pause();
        stream.resume();
        Ok(Meta::empty())
    });

    worker.handle().deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Mkfile,
        path: Some("/sink".to_string()),
        options: WireOptions {
            stream: Some(StreamToken {
                id: 3,
                readable: true,
                writable: false,
            }),
            ..Default::default()
        },
    });
    worker.settle().await;

    let sent = channel.take();
    assert!(sent
        .iter()
        .any(|msg| matches!(msg, Outbound::Pause { id: 3 })));
    assert!(sent
        .iter()
        .any(|msg| matches!(msg, Outbound::Resume { id: 3 })));
}

#[tokio::test]
async fn process_lifecycle_events() {
    let (mut worker, vfs, channel) = setup();
    let stdout = ScriptStream::readable();
    let stdout_state = stdout.state();
    let process = ScriptProcess::new(321).with_stdout(stdout);
    let process_state = process.state();
    vfs.on("spawn", "/bin/cat", move |_options| {
        let mut meta = Meta::empty();
        meta.process = Some(Box::new(process));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Spawn,
        path: Some("/bin/cat".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;

    let meta = channel.reply_meta(1).unwrap();
    let token = meta.process.expect("process token");
    assert_eq!(token.pid, 321);
    let stdout_token = token.stdout.expect("stdout token");
    channel.take();

    stdout_state.emit_data(Chunk::text("out"));
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnData { id, .. } if *id == stdout_token.id
    )));

    process_state.emit_exit(0, None);
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnExit { pid: 321, code: 0, .. }
    )));
    assert_eq!(worker.registry().stats().processes, 0);

    // Close after exit still cleans the stdio stream entries.
    process_state.emit_close(0, None);
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnProcessClose { pid: 321, .. }
    )));
    assert_eq!(worker.registry().stats().streams, 0);
}

#[tokio::test]
async fn kill_routes_to_process() {
    let (mut worker, vfs, _channel) = setup();
    let process = ScriptProcess::new(77);
    let state = process.state();
    vfs.on("spawn", "/job", move |_options| {
        let mut meta = Meta::empty();
        meta.process = Some(Box::new(process));
        Ok(meta)
    });
    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Spawn,
        path: Some("/job".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;

    handle.deliver(Inbound::Kill {
        pid: 77,
        signal: Some(15),
    });
    worker.settle().await;
    assert!(state.killed.load(Ordering::SeqCst));
    assert_eq!(*state.signal.lock().unwrap(), Some(15));
}

#[tokio::test]
async fn pty_shares_one_token_and_routes_stream_ops() {
    let (mut worker, vfs, channel) = setup();
    let pty = ScriptPty::new(31);
    let state = pty.state();
    vfs.on("pty", "/bin/bash", move |_options| {
        let mut meta = Meta::empty();
        meta.pty = Some(Box::new(pty));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Pty,
        path: Some("/bin/bash".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;

    let token = channel.reply_meta(1).unwrap().pty.expect("pty token");
    assert_eq!(token.pid, 31);
    assert!(token.readable);
    assert!(token.writable);
    channel.take();

    // Terminal output arrives under the shared stream id.
    state.emit_output(Chunk::text("$ "));
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnData { id, .. } if *id == token.id
    )));

    // Writes addressed to the stream id reach the terminal.
    handle.deliver(Inbound::Write {
        id: token.id,
        chunk: Chunk::text("ls\n"),
    });
    worker.settle().await;
    assert_eq!(state.written().len(), 1);

    // Resize works, and a failing resize is swallowed.
    handle.deliver(Inbound::Resize {
        pid: 31,
        cols: 80,
        rows: 24,
    });
    worker.settle().await;
    assert_eq!(*state.resizes.lock().unwrap(), vec![(80, 24)]);
    state.fail_resize.store(true, Ordering::SeqCst);
    handle.deliver(Inbound::Resize {
        pid: 31,
        cols: 10,
        rows: 5,
    });
    worker.settle().await;

    // A killed PTY notifies the peer.
    state.emit_pty_kill();
    worker.settle().await;
    assert!(channel
        .take()
        .iter()
        .any(|msg| matches!(msg, Outbound::OnPtyKill { pid: 31 })));

    // Exit drops both the pty entry and its stream alias.
    state.emit_exit(0);
    worker.settle().await;
    assert_eq!(worker.registry().stats().ptys, 0);
    assert_eq!(worker.registry().stats().streams, 0);
}

#[tokio::test]
async fn watcher_lifecycle() {
    let (mut worker, vfs, channel) = setup();
    let watcher = ScriptWatcher::new();
    let state = watcher.state();
    vfs.on("watch", "/dir", move |_options| {
        let mut meta = Meta::empty();
        meta.watcher = Some(Box::new(watcher));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Watch,
        path: Some("/dir".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;
    let token = channel.reply_meta(1).unwrap().watcher.expect("watcher token");
    channel.take();

    state.emit_change("change", "a.txt");
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnChange { id, event, filename, .. }
            if *id == token.id && event == "change" && filename == "a.txt"
    )));

    handle.deliver(Inbound::CloseWatcher { id: token.id });
    worker.settle().await;
    assert!(state.closed.load(Ordering::SeqCst));
    assert_eq!(worker.registry().stats().watchers, 0);
}

#[tokio::test]
async fn api_calls_route_through_registry() {
    let (mut worker, vfs, channel) = setup();
    let (api, calls) = ScriptApi::new("math", &["add", "mul"]);
    vfs.on("use", "math", move |_options| {
        let mut meta = Meta::empty();
        meta.api = Some(Box::new(api));
        Ok(meta)
    });

    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Use,
        path: Some("math".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;
    let token = channel.reply_meta(1).unwrap().api.expect("api token");
    assert_eq!(token.name, "math");
    assert_eq!(token.names, vec!["add", "mul"]);

    handle.deliver(Inbound::Call {
        seq: Some(2),
        api: "math".to_string(),
        fn_name: "add".to_string(),
        args: vec![json!(1), json!(2)],
    });
    worker.settle().await;
    let meta = channel.reply_meta(2).expect("call reply");
    assert_eq!(meta.extra["called"], "add");
    assert_eq!(calls.lock().unwrap().len(), 1);

    // Calls on unknown APIs are silently ignored.
    channel.take();
    handle.deliver(Inbound::Call {
        seq: Some(3),
        api: "nope".to_string(),
        fn_name: "x".to_string(),
        args: vec![],
    });
    worker.settle().await;
    assert!(channel.take().is_empty());
}

#[tokio::test]
async fn named_events_flow_both_ways() {
    let (mut worker, vfs, channel) = setup();
    let handle = worker.handle();
    handle.deliver(Inbound::Subscribe {
        name: "progress".to_string(),
    });
    worker.settle().await;

    vfs.emit_event("progress", json!({"pct": 50}));
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnEvent { name, value } if name == "progress" && value["pct"] == 50
    )));

    // The peer can emit into the VFS as well.
    let mut rx = vfs.subscribe_event("pokes");
    handle.deliver(Inbound::EmitEvent {
        name: "pokes".to_string(),
        value: json!(1),
    });
    worker.settle().await;
    assert_eq!(rx.try_recv().unwrap(), json!(1));

    handle.deliver(Inbound::Unsubscribe {
        name: "progress".to_string(),
    });
    worker.settle().await;
    vfs.emit_event("progress", json!({"pct": 100}));
    worker.settle().await;
    assert!(channel.take().is_empty());
}

#[tokio::test]
async fn killtree_is_pid_addressed() {
    let (mut worker, vfs, channel) = setup();
    vfs.on("killtree", "4242", |_options| Ok(Meta::empty()));
    worker.handle().deliver(Inbound::Killtree {
        seq: Some(1),
        pid: 4242,
        options: WireOptions::default(),
    });
    worker.settle().await;
    assert!(channel.reply(1).is_some());
    assert_eq!(vfs.calls(), vec!["killtree 4242"]);
}

#[tokio::test]
async fn enoent_failures_reply_with_envelope() {
    let (mut worker, vfs, channel) = setup();
    vfs.on("readfile", "/gone", |_options| {
        Err(vfsbridge_vfs::VfsError::not_found("no such file: /gone"))
    });
    worker.handle().deliver(readfile_op(1, "/gone"));
    worker.settle().await;
    match channel.reply(1) {
        Some(Outbound::Reply {
            error: Some(envelope),
            meta: None,
            ..
        }) => {
            assert_eq!(envelope.code, Some(ErrorCode::NotFound));
            assert!(envelope.stack.contains("no such file"));
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn end_chunk_is_forwarded() {
    let (mut worker, vfs, channel) = setup();
    let stream = ScriptStream::readable();
    let state = stream.state();
    vfs.on("readfile", "/tail", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        Ok(meta)
    });
    worker.handle().deliver(readfile_op(1, "/tail"));
    worker.settle().await;
    let id = channel.reply_meta(1).unwrap().stream.unwrap().id;
    channel.take();

    state.emit_end(Some(Chunk::text("last")));
    worker.settle().await;
    assert!(channel.take().iter().any(|msg| matches!(
        msg,
        Outbound::OnEnd { id: i, chunk: Some(Chunk::Bytes(b)) } if *i == id && b == b"last"
    )));
}

#[tokio::test]
async fn remote_end_reaches_local_writable() {
    let (mut worker, vfs, channel) = setup();
    let stream = ScriptStream::writable();
    let state = stream.state();
    vfs.on("connect", "/sock", move |_options| {
        let mut meta = Meta::empty();
        meta.stream = Some(Box::new(stream));
        Ok(meta)
    });
    let handle = worker.handle();
    handle.deliver(Inbound::Op {
        seq: Some(1),
        op: OpKind::Connect,
        path: Some("/sock".to_string()),
        options: WireOptions::default(),
    });
    worker.settle().await;
    let token = channel.reply_meta(1).unwrap().stream.unwrap();
    assert!(token.writable);

    handle.deliver(Inbound::Write {
        id: token.id,
        chunk: Chunk::text("hello"),
    });
    handle.deliver(Inbound::End {
        id: token.id,
        chunk: None,
    });
    worker.settle().await;
    assert_eq!(state.written().len(), 1);
    assert!(state.ended.load(Ordering::SeqCst));
}
