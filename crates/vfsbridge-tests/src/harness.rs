//! Scripted resources and doubles for driving the bridge in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use vfsbridge_gateway::{HttpResponse, MultipartPart, PartSource, ResponseBody};
use vfsbridge_vfs::{
    Chunk, ErrorCode, Meta, OpOptions, ProcessEvent, Result, StreamEvent, Vfs, VfsApi,
    VfsError, VfsProcess, VfsPty, VfsStream, VfsWatcher, WatchEvent,
};
use vfsbridge_worker::{Channel, MetaToken, Outbound};

/// Observable state of a [`ScriptStream`], shared with the test.
pub struct ScriptStreamState {
    tx: mpsc::UnboundedSender<StreamEvent>,
    /// Set by `pause`.
    pub paused: AtomicBool,
    /// Set by `destroy`.
    pub destroyed: AtomicBool,
    /// Set by `end`.
    pub ended: AtomicBool,
    /// Number of `pause` calls observed.
    pub pause_calls: AtomicU32,
    /// Number of `resume` calls observed.
    pub resume_calls: AtomicU32,
    written: Mutex<Vec<Chunk>>,
    accept_writes: AtomicBool,
}

impl ScriptStreamState {
    /// Emits a data event on the stream.
    pub fn emit_data(&self, chunk: Chunk) {
        let _ = self.tx.send(StreamEvent::Data(chunk));
    }

    /// Emits an end event.
    pub fn emit_end(&self, chunk: Option<Chunk>) {
        let _ = self.tx.send(StreamEvent::End(chunk));
    }

    /// Emits a close event.
    pub fn emit_close(&self) {
        let _ = self.tx.send(StreamEvent::Close);
    }

    /// Emits an error event.
    pub fn emit_error(&self, err: VfsError) {
        let _ = self.tx.send(StreamEvent::Error(err));
    }

    /// Makes subsequent writes report backpressure.
    pub fn refuse_writes(&self) {
        self.accept_writes.store(false, Ordering::SeqCst);
    }

    /// Chunks written into the stream so far.
    pub fn written(&self) -> Vec<Chunk> {
        self.written.lock().unwrap().clone()
    }
}

/// A stream whose events and observations are driven by the test.
pub struct ScriptStream {
    readable: bool,
    writable: bool,
    resource: Option<u64>,
    state: Arc<ScriptStreamState>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

impl ScriptStream {
    fn new(readable: bool, writable: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            readable,
            writable,
            resource: None,
            state: Arc::new(ScriptStreamState {
                tx,
                paused: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                pause_calls: AtomicU32::new(0),
                resume_calls: AtomicU32::new(0),
                written: Mutex::new(Vec::new()),
                accept_writes: AtomicBool::new(true),
            }),
            events: Some(rx),
        }
    }

    /// A readable stream.
    pub fn readable() -> Self {
        Self::new(true, false)
    }

    /// A writable sink.
    pub fn writable() -> Self {
        Self::new(false, true)
    }

    /// A duplex stream.
    pub fn duplex() -> Self {
        Self::new(true, true)
    }

    /// A readable stream pre-loaded with `bytes`, ending immediately.
    pub fn prefilled(bytes: Vec<u8>) -> Self {
        let stream = Self::new(true, false);
        if !bytes.is_empty() {
            stream.state.emit_data(Chunk::Bytes(bytes));
        }
        stream.state.emit_end(None);
        stream.state.emit_close();
        stream
    }

    /// A readable object-mode stream pre-loaded with `entries`.
    pub fn prefilled_objects(entries: Vec<Value>) -> Self {
        let stream = Self::new(true, false);
        for entry in entries {
            stream.state.emit_data(Chunk::Object(entry));
        }
        stream.state.emit_end(None);
        stream.state.emit_close();
        stream
    }

    /// Tags the stream with a stable resource identity.
    pub fn with_resource(mut self, id: u64) -> Self {
        self.resource = Some(id);
        self
    }

    /// The shared observation handle.
    pub fn state(&self) -> Arc<ScriptStreamState> {
        self.state.clone()
    }
}

impl VfsStream for ScriptStream {
    fn is_readable(&self) -> bool {
        self.readable
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn resource_id(&self) -> Option<u64> {
        self.resource
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events.take()
    }

    fn write(&mut self, chunk: Chunk) -> bool {
        self.state.written.lock().unwrap().push(chunk);
        self.state.accept_writes.load(Ordering::SeqCst)
    }

    fn end(&mut self, chunk: Option<Chunk>) {
        self.state.ended.store(true, Ordering::SeqCst);
        let _ = self.state.tx.send(StreamEvent::End(chunk));
    }

    fn pause(&mut self) {
        self.state.paused.store(true, Ordering::SeqCst);
        self.state.pause_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.state.paused.store(false, Ordering::SeqCst);
        self.state.resume_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        self.state.destroyed.store(true, Ordering::SeqCst);
        let _ = self.state.tx.send(StreamEvent::Close);
    }
}

/// Observable state of a [`ScriptProcess`].
pub struct ScriptProcessState {
    tx: mpsc::UnboundedSender<ProcessEvent>,
    /// Set by `kill`.
    pub killed: AtomicBool,
    /// Signal passed to the last `kill`.
    pub signal: Mutex<Option<i32>>,
    /// Set by `unref`.
    pub unreffed: AtomicBool,
}

impl ScriptProcessState {
    /// Emits an exit event.
    pub fn emit_exit(&self, code: i32, signal: Option<&str>) {
        let _ = self.tx.send(ProcessEvent::Exit {
            code,
            signal: signal.map(str::to_string),
        });
    }

    /// Emits a close event.
    pub fn emit_close(&self, code: i32, signal: Option<&str>) {
        let _ = self.tx.send(ProcessEvent::Close {
            code,
            signal: signal.map(str::to_string),
        });
    }
}

/// A process whose lifecycle is driven by the test.
pub struct ScriptProcess {
    pid: u32,
    state: Arc<ScriptProcessState>,
    events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    stdin: Option<Box<dyn VfsStream>>,
    stdout: Option<Box<dyn VfsStream>>,
    stderr: Option<Box<dyn VfsStream>>,
}

impl ScriptProcess {
    /// A process with the given pid and no stdio.
    pub fn new(pid: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pid,
            state: Arc::new(ScriptProcessState {
                tx,
                killed: AtomicBool::new(false),
                signal: Mutex::new(None),
                unreffed: AtomicBool::new(false),
            }),
            events: Some(rx),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Attaches a stdin sink.
    pub fn with_stdin(mut self, stream: ScriptStream) -> Self {
        self.stdin = Some(Box::new(stream));
        self
    }

    /// Attaches a stdout source.
    pub fn with_stdout(mut self, stream: ScriptStream) -> Self {
        self.stdout = Some(Box::new(stream));
        self
    }

    /// Attaches a stderr source.
    pub fn with_stderr(mut self, stream: ScriptStream) -> Self {
        self.stderr = Some(Box::new(stream));
        self
    }

    /// The shared observation handle.
    pub fn state(&self) -> Arc<ScriptProcessState> {
        self.state.clone()
    }
}

impl VfsProcess for ScriptProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        self.events.take()
    }

    fn take_stdin(&mut self) -> Option<Box<dyn VfsStream>> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn VfsStream>> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<Box<dyn VfsStream>> {
        self.stderr.take()
    }

    fn kill(&mut self, signal: Option<i32>) {
        self.state.killed.store(true, Ordering::SeqCst);
        *self.state.signal.lock().unwrap() = signal;
    }

    fn unref(&mut self) {
        self.state.unreffed.store(true, Ordering::SeqCst);
    }
}

/// Observable state of a [`ScriptPty`].
pub struct ScriptPtyState {
    stream_tx: mpsc::UnboundedSender<StreamEvent>,
    process_tx: mpsc::UnboundedSender<ProcessEvent>,
    /// Set by `kill`.
    pub killed: AtomicBool,
    /// Set by `destroy`.
    pub destroyed: AtomicBool,
    /// Set by `pause`.
    pub paused: AtomicBool,
    /// Resize calls observed, as `(cols, rows)`.
    pub resizes: Mutex<Vec<(u16, u16)>>,
    /// Makes `resize` fail.
    pub fail_resize: AtomicBool,
    written: Mutex<Vec<Chunk>>,
}

impl ScriptPtyState {
    /// Emits terminal output.
    pub fn emit_output(&self, chunk: Chunk) {
        let _ = self.stream_tx.send(StreamEvent::Data(chunk));
    }

    /// Emits the PTY-killed event.
    pub fn emit_pty_kill(&self) {
        let _ = self.process_tx.send(ProcessEvent::PtyKill);
    }

    /// Emits an exit event.
    pub fn emit_exit(&self, code: i32) {
        let _ = self.process_tx.send(ProcessEvent::Exit { code, signal: None });
    }

    /// Chunks written into the terminal so far.
    pub fn written(&self) -> Vec<Chunk> {
        self.written.lock().unwrap().clone()
    }
}

/// A PTY whose lifecycle is driven by the test.
pub struct ScriptPty {
    pid: u32,
    state: Arc<ScriptPtyState>,
    stream_events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    process_events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
}

impl ScriptPty {
    /// A PTY with the given pid.
    pub fn new(pid: u32) -> Self {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        Self {
            pid,
            state: Arc::new(ScriptPtyState {
                stream_tx,
                process_tx,
                killed: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                resizes: Mutex::new(Vec::new()),
                fail_resize: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
            }),
            stream_events: Some(stream_rx),
            process_events: Some(process_rx),
        }
    }

    /// The shared observation handle.
    pub fn state(&self) -> Arc<ScriptPtyState> {
        self.state.clone()
    }
}

impl VfsPty for ScriptPty {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn take_stream_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.stream_events.take()
    }

    fn take_process_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        self.process_events.take()
    }

    fn write(&mut self, chunk: Chunk) -> bool {
        self.state.written.lock().unwrap().push(chunk);
        true
    }

    fn end(&mut self, _chunk: Option<Chunk>) {}

    fn pause(&mut self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    fn kill(&mut self, _signal: Option<i32>) {
        self.state.killed.store(true, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        self.state.destroyed.store(true, Ordering::SeqCst);
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        if self.state.fail_resize.load(Ordering::SeqCst) {
            return Err(VfsError::message("resize failed"));
        }
        self.state.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }
}

/// Observable state of a [`ScriptWatcher`].
pub struct ScriptWatcherState {
    tx: mpsc::UnboundedSender<WatchEvent>,
    /// Set by `close`.
    pub closed: AtomicBool,
}

impl ScriptWatcherState {
    /// Emits a change event.
    pub fn emit_change(&self, event: &str, filename: &str) {
        let _ = self.tx.send(WatchEvent::Change {
            event: event.to_string(),
            filename: filename.to_string(),
            stat: None,
            files: None,
        });
    }
}

/// A watcher whose events are driven by the test.
pub struct ScriptWatcher {
    state: Arc<ScriptWatcherState>,
    events: Option<mpsc::UnboundedReceiver<WatchEvent>>,
}

impl ScriptWatcher {
    /// A fresh watcher.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ScriptWatcherState {
                tx,
                closed: AtomicBool::new(false),
            }),
            events: Some(rx),
        }
    }

    /// The shared observation handle.
    pub fn state(&self) -> Arc<ScriptWatcherState> {
        self.state.clone()
    }
}

impl Default for ScriptWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsWatcher for ScriptWatcher {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<WatchEvent>> {
        self.events.take()
    }

    fn close(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// An extension API recording its invocations.
pub struct ScriptApi {
    name: String,
    methods: Vec<String>,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
}

impl ScriptApi {
    /// An API named `name` exposing `methods`. The returned handle
    /// records every call.
    pub fn new(name: &str, methods: &[&str]) -> (Self, Arc<Mutex<Vec<(String, Vec<Value>)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                methods: methods.iter().map(|m| m.to_string()).collect(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl VfsApi for ScriptApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn method_names(&self) -> Vec<String> {
        self.methods.clone()
    }

    async fn call(&mut self, fn_name: &str, args: Vec<Value>) -> Result<Meta> {
        if !self.methods.iter().any(|m| m == fn_name) {
            return Err(VfsError::message(format!("no such method: {}", fn_name)));
        }
        self.calls
            .lock()
            .unwrap()
            .push((fn_name.to_string(), args));
        let mut meta = Meta::empty();
        meta.extra
            .insert("called".to_string(), Value::from(fn_name));
        Ok(meta)
    }
}

/// A channel that records every outbound message and whose acceptance is
/// switchable, to exercise backpressure.
pub struct MockChannel {
    sent: Mutex<Vec<Outbound>>,
    accepting: AtomicBool,
}

impl MockChannel {
    /// An accepting channel.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        })
    }

    /// Start refusing sends (transport buffer "full").
    pub fn refuse(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Accept sends again.
    pub fn accept(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    /// Drains and returns everything sent so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    /// The reply for `seq`, when one was sent.
    pub fn reply(&self, seq: u64) -> Option<Outbound> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|msg| matches!(msg, Outbound::Reply { seq: s, .. } if *s == seq))
            .cloned()
    }

    /// The meta token of a successful reply for `seq`.
    pub fn reply_meta(&self, seq: u64) -> Option<MetaToken> {
        match self.reply(seq)? {
            Outbound::Reply { meta, .. } => meta,
            _ => None,
        }
    }
}

impl Channel for MockChannel {
    fn send(&self, msg: Outbound) -> bool {
        self.sent.lock().unwrap().push(msg);
        self.accepting.load(Ordering::SeqCst)
    }
}

type OpHandler = Box<dyn FnOnce(OpOptions) -> Result<Meta> + Send>;

/// A programmable VFS: tests register one-shot handlers per operation and
/// path, and the double records every call it sees.
#[derive(Default)]
pub struct ScriptVfs {
    handlers: Mutex<HashMap<String, VecDeque<OpHandler>>>,
    calls: Mutex<Vec<String>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

impl ScriptVfs {
    /// A VFS with no handlers: every operation fails `ENOSYS`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot handler for `op` on `path`.
    pub fn on(
        &self,
        op: &str,
        path: &str,
        handler: impl FnOnce(OpOptions) -> Result<Meta> + Send + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .entry(format!("{} {}", op, path))
            .or_default()
            .push_back(Box::new(handler));
    }

    /// Operations seen so far, as `"op path"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn run(&self, op: &str, path: &str, options: OpOptions) -> Result<Meta> {
        let key = format!("{} {}", op, path);
        self.calls.lock().unwrap().push(key.clone());
        let handler = self.handlers.lock().unwrap().get_mut(&key).and_then(VecDeque::pop_front);
        match handler {
            Some(handler) => handler(options),
            None => Err(VfsError::new(
                ErrorCode::Other("ENOSYS".to_string()),
                format!("no handler for {}", key),
            )),
        }
    }
}

#[async_trait]
impl Vfs for ScriptVfs {
    async fn resolve(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("resolve", path, options)
    }

    async fn stat(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("stat", path, options)
    }

    async fn metadata(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("metadata", path, options)
    }

    async fn readfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("readfile", path, options)
    }

    async fn readdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("readdir", path, options)
    }

    async fn mkfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("mkfile", path, options)
    }

    async fn mkdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("mkdir", path, options)
    }

    async fn mkdirp(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("mkdirP", path, options)
    }

    async fn appendfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("appendfile", path, options)
    }

    async fn rmfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("rmfile", path, options)
    }

    async fn rmdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("rmdir", path, options)
    }

    async fn rename(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("rename", path, options)
    }

    async fn copy(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("copy", path, options)
    }

    async fn chmod(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("chmod", path, options)
    }

    async fn symlink(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("symlink", path, options)
    }

    async fn watch(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("watch", path, options)
    }

    async fn connect(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("connect", path, options)
    }

    async fn spawn(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("spawn", path, options)
    }

    async fn pty(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("pty", path, options)
    }

    async fn tmux(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("tmux", path, options)
    }

    async fn execfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        self.run("execFile", path, options)
    }

    async fn extend(&self, name: &str, options: OpOptions) -> Result<Meta> {
        self.run("extend", name, options)
    }

    async fn unextend(&self, name: &str, options: OpOptions) -> Result<Meta> {
        self.run("unextend", name, options)
    }

    async fn use_api(&self, name: &str, options: OpOptions) -> Result<Meta> {
        self.run("use", name, options)
    }

    async fn killtree(&self, pid: u32, options: OpOptions) -> Result<Meta> {
        self.run("killtree", &pid.to_string(), options)
    }

    fn subscribe_event(&self, name: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn emit_event(&self, name: &str, value: Value) {
        if let Some(subscribers) = self.subscribers.lock().unwrap().get_mut(name) {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }
}

/// A part source over a fixed list of parts.
pub struct ScriptPartSource {
    parts: VecDeque<MultipartPart>,
}

impl ScriptPartSource {
    /// A source yielding `parts` in order.
    pub fn new(parts: Vec<MultipartPart>) -> Self {
        Self {
            parts: parts.into(),
        }
    }

    /// Builds a part with a `Content-Disposition` file name and a body.
    pub fn part(filename: &str, body: Vec<u8>) -> MultipartPart {
        let mut headers = HashMap::new();
        headers.insert(
            "content-disposition".to_string(),
            format!("form-data; name=\"file\"; filename=\"{}\"", filename),
        );
        MultipartPart {
            headers,
            body: Box::new(ScriptStream::prefilled(body)),
        }
    }
}

#[async_trait]
impl PartSource for ScriptPartSource {
    async fn next_part(&mut self) -> Option<MultipartPart> {
        self.parts.pop_front()
    }
}

/// Reads a stream to completion, concatenating byte chunks.
pub async fn collect_stream_bytes(mut stream: Box<dyn VfsStream>) -> Vec<u8> {
    let mut out = Vec::new();
    let Some(mut events) = stream.take_events() else {
        return out;
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
            StreamEvent::Error(_) => break,
            StreamEvent::Drain => {}
        }
    }
    out
}

/// Reads a response body to completion.
pub async fn collect_response_body(resp: HttpResponse) -> Vec<u8> {
    match resp.body {
        ResponseBody::Empty => Vec::new(),
        ResponseBody::Bytes(bytes) => bytes,
        ResponseBody::Stream(stream) => collect_stream_bytes(stream).await,
    }
}
