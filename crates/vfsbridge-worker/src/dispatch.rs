//! The per-connection worker: routes peer messages, runs VFS operations,
//! forwards resource events, and tears everything down on disconnect.
//!
//! All registry mutation happens on one task draining one input queue, so
//! dispatch within a connection is run-to-completion: messages are handled
//! in receive order, operation replies are emitted as their results land
//! (not necessarily in arrival order), and per-handle event order is
//! preserved by the per-resource forwarder tasks.

use crate::flow::FlowController;
use crate::marshal::{project_error, project_meta, HandleEvents};
use crate::proxy::{ProxyHandle, ProxyStream};
use crate::registry::{HandleRegistry, RegistryStats};
use crate::wire::{Channel, Inbound, MetaToken, OpKind, Outbound, WireOptions};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vfsbridge_vfs::{
    ErrorCode, Meta, OpOptions, ProcessEvent, StreamEvent, Vfs, VfsError, VfsStream, WatchEvent,
};

/// Inputs the worker's queue carries: peer messages, channel signals, and
/// events pumped from registered resources.
pub enum WorkerInput {
    /// A message from the peer.
    Message(Inbound),
    /// The channel can accept writes again.
    Drain,
    /// The channel went away. Triggers teardown; `None` synthesizes an
    /// `EDISCONNECT` error.
    Disconnect(Option<VfsError>),
    /// A spawned VFS operation or API call finished.
    OpComplete {
        /// Reply sequence of the originating request.
        seq: u64,
        /// The operation's result.
        result: Result<Meta, VfsError>,
    },
    /// An event from a registered local stream.
    StreamEvent {
        /// Registry stream id.
        id: u16,
        /// The event.
        event: StreamEvent,
    },
    /// An event from a registered process or PTY.
    ProcessEvent {
        /// Process id.
        pid: u32,
        /// The event.
        event: ProcessEvent,
    },
    /// An event from a registered watcher.
    WatchEvent {
        /// Registry watcher id.
        id: u16,
        /// The event.
        event: WatchEvent,
    },
    /// A subscribed named VFS event fired.
    VfsEvent {
        /// Event name.
        name: String,
        /// Event payload.
        value: Value,
    },
}

/// Cloneable sender half used by the embedder to feed the worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerInput>,
}

impl WorkerHandle {
    /// Delivers a peer message. Returns `false` when the worker is gone.
    pub fn deliver(&self, msg: Inbound) -> bool {
        self.tx.send(WorkerInput::Message(msg)).is_ok()
    }

    /// Signals that the channel drained.
    pub fn drain(&self) -> bool {
        self.tx.send(WorkerInput::Drain).is_ok()
    }

    /// Signals that the channel disconnected.
    pub fn disconnect(&self, err: Option<VfsError>) -> bool {
        self.tx.send(WorkerInput::Disconnect(err)).is_ok()
    }
}

/// The per-connection RPC worker.
pub struct Worker {
    vfs: Arc<dyn Vfs>,
    channel: Arc<dyn Channel>,
    registry: HandleRegistry,
    proxies: HashMap<u16, ProxyHandle>,
    flow: FlowController,
    subscriptions: HashMap<String, JoinHandle<()>>,
    forwarders: Vec<JoinHandle<()>>,
    started: Instant,
    disconnected: bool,
    inflight: usize,
    input_tx: mpsc::UnboundedSender<WorkerInput>,
    input_rx: mpsc::UnboundedReceiver<WorkerInput>,
}

impl Worker {
    /// Builds a worker serving `vfs` over `channel`.
    pub fn new(vfs: Arc<dyn Vfs>, channel: Arc<dyn Channel>) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            vfs,
            channel,
            registry: HandleRegistry::new(),
            proxies: HashMap::new(),
            flow: FlowController::new(),
            subscriptions: HashMap::new(),
            forwarders: Vec::new(),
            started: Instant::now(),
            disconnected: false,
            inflight: 0,
            input_tx,
            input_rx,
        }
    }

    /// A sender the embedder (and tests) use to feed the worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            tx: self.input_tx.clone(),
        }
    }

    /// The registry, for inspection.
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Live handle counts, proxies included.
    pub fn stats(&self) -> (RegistryStats, usize) {
        (self.registry.stats(), self.proxies.len())
    }

    /// The flow controller, for inspection.
    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Whether disconnect teardown has run.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Serves the queue until disconnect teardown completes or every
    /// handle to the queue is gone.
    pub async fn run(&mut self) {
        while !self.disconnected {
            let input = self.input_rx.recv().await;
            match input {
                Some(input) => self.handle_input(input).await,
                None => break,
            }
        }
    }

    /// Processes queued inputs until the worker goes quiescent: the queue
    /// is empty and no spawned operation is in flight. Used by embedders
    /// that drive the worker step by step, and by tests.
    pub async fn settle(&mut self) {
        loop {
            let next =
                tokio::time::timeout(Duration::from_millis(50), self.input_rx.recv()).await;
            match next {
                Ok(Some(input)) => self.handle_input(input).await,
                Ok(None) => break,
                Err(_) => {
                    if self.inflight == 0 {
                        break;
                    }
                }
            }
        }
    }

    /// Handles one queued input.
    pub async fn handle_input(&mut self, input: WorkerInput) {
        if self.disconnected {
            return;
        }
        match input {
            WorkerInput::Message(msg) => self.handle_message(msg).await,
            WorkerInput::Drain => self.handle_drain(),
            WorkerInput::Disconnect(err) => self.teardown(err),
            WorkerInput::OpComplete { seq, result } => self.finish_op(seq, result),
            WorkerInput::StreamEvent { id, event } => self.handle_stream_event(id, event),
            WorkerInput::ProcessEvent { pid, event } => self.handle_process_event(pid, event),
            WorkerInput::WatchEvent { id, event } => self.handle_watch_event(id, event),
            WorkerInput::VfsEvent { name, value } => {
                self.channel.send(Outbound::OnEvent { name, value });
            }
        }
    }

    async fn handle_message(&mut self, msg: Inbound) {
        match msg {
            Inbound::Write { id, chunk } => {
                self.registry.stream_write(id, chunk);
            }
            Inbound::End { id, chunk } => self.registry.stream_end(id, chunk),
            Inbound::Destroy { id } => self.registry.stream_destroy(id),
            Inbound::Pause { id } => self.registry.stream_pause(id),
            Inbound::Resume { id } => {
                self.registry.stream_resume(id);
                self.flow.forget(id);
            }
            Inbound::OnData { id, chunk } => {
                if let Some(proxy) = self.proxies.get(&id) {
                    proxy.push_data(chunk);
                }
            }
            Inbound::OnEnd { id, chunk } => {
                // The proxy stays registered until onClose; end is an
                // event, not a deletion.
                if let Some(proxy) = self.proxies.get(&id) {
                    proxy.push_end(chunk);
                }
            }
            Inbound::OnClose { id } => {
                if let Some(proxy) = self.proxies.remove(&id) {
                    proxy.push_close();
                }
            }
            Inbound::Kill { pid, signal } => self.registry.process_kill(pid, signal),
            Inbound::Unref { pid } => self.registry.process_unref(pid),
            Inbound::Resize { pid, cols, rows } => {
                if let Err(err) = self.registry.pty_resize(pid, cols, rows) {
                    debug!(pid, cols, rows, error = %err, "pty resize failed");
                }
            }
            Inbound::CloseWatcher { id } => self.registry.close_watcher(id),
            Inbound::Call {
                seq,
                api,
                fn_name,
                args,
            } => self.handle_call(seq, api, fn_name, args),
            Inbound::Subscribe { name } => self.handle_subscribe(name),
            Inbound::Unsubscribe { name } => {
                if let Some(task) = self.subscriptions.remove(&name) {
                    task.abort();
                }
            }
            Inbound::EmitEvent { name, value } => self.vfs.emit_event(&name, value),
            Inbound::Ping { seq, server_time } => self.handle_ping(seq, server_time),
            Inbound::Op {
                seq,
                op,
                path,
                options,
            } => self.handle_op(seq, op, path, options),
            Inbound::Killtree { seq, pid, options } => self.handle_killtree(seq, pid, options),
        }
    }

    fn handle_ping(&mut self, seq: Option<u64>, server_time: bool) {
        let Some(seq) = seq else {
            warn!("refusing ping without reply sequence");
            return;
        };
        let mut meta = MetaToken::default();
        if server_time {
            let elapsed = self.started.elapsed().as_millis() as u64;
            meta.extra
                .insert("serverTime".to_string(), Value::from(elapsed));
        }
        self.channel.send(Outbound::Reply {
            seq,
            error: None,
            meta: Some(meta),
        });
    }

    fn handle_op(
        &mut self,
        seq: Option<u64>,
        op: OpKind,
        path: Option<String>,
        options: WireOptions,
    ) {
        let Some(seq) = seq else {
            warn!(op = op.name(), "refusing operation without reply sequence");
            return;
        };
        let Some(path) = path else {
            let err = VfsError::invalid_path(format!("{} requires a path", op.name()));
            self.channel.send(Outbound::Reply {
                seq,
                error: Some(project_error(&err)),
                meta: None,
            });
            return;
        };
        let op_options = self.build_options(options);
        let vfs = self.vfs.clone();
        let tx = self.input_tx.clone();
        self.inflight += 1;
        tokio::spawn(async move {
            let result = dispatch_op(vfs.as_ref(), op, &path, op_options).await;
            let _ = tx.send(WorkerInput::OpComplete { seq, result });
        });
    }

    fn handle_killtree(&mut self, seq: Option<u64>, pid: u32, options: WireOptions) {
        let Some(seq) = seq else {
            warn!("refusing killtree without reply sequence");
            return;
        };
        let op_options = self.build_options(options);
        let vfs = self.vfs.clone();
        let tx = self.input_tx.clone();
        self.inflight += 1;
        tokio::spawn(async move {
            let result = vfs.killtree(pid, op_options).await;
            let _ = tx.send(WorkerInput::OpComplete { seq, result });
        });
    }

    fn handle_call(&mut self, seq: Option<u64>, api: String, fn_name: String, args: Vec<Value>) {
        let Some(seq) = seq else {
            warn!(api = %api, fn_name = %fn_name, "refusing api call without reply sequence");
            return;
        };
        let Some(entry) = self.registry.lookup_api(&api) else {
            debug!(api = %api, "ignoring call on unknown api");
            return;
        };
        let tx = self.input_tx.clone();
        self.inflight += 1;
        tokio::spawn(async move {
            let result = entry.lock().await.call(&fn_name, args).await;
            let _ = tx.send(WorkerInput::OpComplete { seq, result });
        });
    }

    fn handle_subscribe(&mut self, name: String) {
        if self.subscriptions.contains_key(&name) {
            return;
        }
        let mut rx = self.vfs.subscribe_event(&name);
        let tx = self.input_tx.clone();
        let event_name = name.clone();
        let task = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let input = WorkerInput::VfsEvent {
                    name: event_name.clone(),
                    value,
                };
                if tx.send(input).is_err() {
                    break;
                }
            }
        });
        self.subscriptions.insert(name, task);
    }

    /// Converts wire options, replacing a stream token with a registered
    /// proxy.
    fn build_options(&mut self, mut options: WireOptions) -> OpOptions {
        let stream = options.stream.take().map(|token| {
            let (proxy, handle) = ProxyStream::new(&token, self.channel.clone());
            self.proxies.insert(token.id, handle);
            Box::new(proxy) as Box<dyn VfsStream>
        });
        options.into_options(stream)
    }

    fn finish_op(&mut self, seq: u64, result: Result<Meta, VfsError>) {
        self.inflight = self.inflight.saturating_sub(1);
        match result {
            Ok(meta) => {
                let marshalled = project_meta(&mut self.registry, meta);
                self.spawn_forwarders(marshalled.events);
                self.channel.send(Outbound::Reply {
                    seq,
                    error: None,
                    meta: Some(marshalled.token),
                });
            }
            Err(err) => {
                let envelope = project_error(&err);
                if !err.has_code(&ErrorCode::NotFound) {
                    warn!(seq, stack = %envelope.stack, "operation failed");
                }
                self.channel.send(Outbound::Reply {
                    seq,
                    error: Some(envelope),
                    meta: None,
                });
            }
        }
    }

    fn spawn_forwarders(&mut self, events: Vec<HandleEvents>) {
        for feed in events {
            let tx = self.input_tx.clone();
            let task = match feed {
                HandleEvents::Stream { id, mut rx } => tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if tx.send(WorkerInput::StreamEvent { id, event }).is_err() {
                            break;
                        }
                    }
                }),
                HandleEvents::Process { pid, mut rx } => tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if tx.send(WorkerInput::ProcessEvent { pid, event }).is_err() {
                            break;
                        }
                    }
                }),
                HandleEvents::Watcher { id, mut rx } => tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if tx.send(WorkerInput::WatchEvent { id, event }).is_err() {
                            break;
                        }
                    }
                }),
            };
            self.forwarders.push(task);
        }
    }

    fn handle_stream_event(&mut self, id: u16, event: StreamEvent) {
        match event {
            StreamEvent::Data(chunk) => {
                let accepted = self.channel.send(Outbound::OnData { id, chunk });
                if !accepted && self.flow.note_refused(id) {
                    self.registry.stream_pause(id);
                }
            }
            StreamEvent::End(chunk) => {
                self.registry.remove_stream(id);
                self.flow.forget(id);
                self.channel.send(Outbound::OnEnd { id, chunk });
            }
            StreamEvent::Close => {
                self.registry.remove_stream(id);
                self.flow.forget(id);
                self.channel.send(Outbound::OnClose { id });
            }
            StreamEvent::Error(err) => {
                // Not terminal: the entry stays until close.
                self.channel.send(Outbound::OnError {
                    id,
                    error: project_error(&err),
                });
            }
            StreamEvent::Drain => {}
        }
    }

    fn handle_process_event(&mut self, pid: u32, event: ProcessEvent) {
        match event {
            ProcessEvent::Exit { code, signal } => {
                if self.registry.is_pty(pid) {
                    if let Some(id) = self.registry.remove_pty(pid) {
                        self.flow.forget(id);
                    }
                } else {
                    self.registry.remove_process(pid);
                }
                self.channel.send(Outbound::OnExit { pid, code, signal });
            }
            ProcessEvent::Close { code, signal } => {
                if self.registry.is_pty(pid) {
                    if let Some(id) = self.registry.remove_pty(pid) {
                        self.flow.forget(id);
                    }
                } else {
                    for id in self.registry.close_process(pid) {
                        self.flow.forget(id);
                    }
                }
                self.channel
                    .send(Outbound::OnProcessClose { pid, code, signal });
            }
            ProcessEvent::PtyKill => {
                self.channel.send(Outbound::OnPtyKill { pid });
            }
        }
    }

    fn handle_watch_event(&mut self, id: u16, event: WatchEvent) {
        let WatchEvent::Change {
            event,
            filename,
            stat,
            files,
        } = event;
        self.channel.send(Outbound::OnChange {
            id,
            event,
            filename,
            stat,
            files,
        });
    }

    fn handle_drain(&mut self) {
        self.flow.on_drain();
        self.registry.resume_all_readables();
        for proxy in self.proxies.values() {
            if proxy.writable {
                proxy.push_drain();
            }
        }
    }

    /// Disconnect teardown. Processes are killed before their streams are
    /// closed, matching the order that avoids spurious pipe errors; proxy
    /// consumers see a close; watchers are closed; APIs are dropped
    /// silently.
    fn teardown(&mut self, err: Option<VfsError>) {
        let err = err.unwrap_or_else(|| VfsError::disconnected("the channel disconnected"));
        debug!(error = %err, "tearing down connection resources");

        self.registry.teardown_processes();
        self.registry.teardown_streams();
        for (_, proxy) in self.proxies.drain() {
            proxy.push_close();
        }
        self.registry.teardown_watchers();
        self.registry.clear_apis();

        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
        for task in self.forwarders.drain(..) {
            task.abort();
        }
        self.disconnected = true;
    }
}

async fn dispatch_op(
    vfs: &dyn Vfs,
    op: OpKind,
    path: &str,
    options: OpOptions,
) -> Result<Meta, VfsError> {
    match op {
        OpKind::Resolve => vfs.resolve(path, options).await,
        OpKind::Stat => vfs.stat(path, options).await,
        OpKind::Metadata => vfs.metadata(path, options).await,
        OpKind::Readfile => vfs.readfile(path, options).await,
        OpKind::Readdir => vfs.readdir(path, options).await,
        OpKind::Mkfile => vfs.mkfile(path, options).await,
        OpKind::Mkdir => vfs.mkdir(path, options).await,
        OpKind::MkdirP => vfs.mkdirp(path, options).await,
        OpKind::Appendfile => vfs.appendfile(path, options).await,
        OpKind::Rmfile => vfs.rmfile(path, options).await,
        OpKind::Rmdir => vfs.rmdir(path, options).await,
        OpKind::Rename => vfs.rename(path, options).await,
        OpKind::Copy => vfs.copy(path, options).await,
        OpKind::Chmod => vfs.chmod(path, options).await,
        OpKind::Symlink => vfs.symlink(path, options).await,
        OpKind::Watch => vfs.watch(path, options).await,
        OpKind::Connect => vfs.connect(path, options).await,
        OpKind::Spawn => vfs.spawn(path, options).await,
        OpKind::Pty => vfs.pty(path, options).await,
        OpKind::Tmux => vfs.tmux(path, options).await,
        OpKind::ExecFile => vfs.execfile(path, options).await,
        OpKind::Extend => vfs.extend(path, options).await,
        OpKind::Unextend => vfs.unextend(path, options).await,
        OpKind::Use => vfs.use_api(path, options).await,
    }
}
