//! Per-connection handle registry.
//!
//! Tracks every live resource the peer can address: local streams,
//! processes, PTYs, watchers, and extension APIs. IDs roll through a
//! 1..9999 ring per kind, skipping occupied slots; allocation terminates
//! because the live count is bounded far below the ring size.

use crate::wire::{ApiToken, ProcessToken, PtyToken, StreamToken, WatcherToken, ID_RING};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use vfsbridge_vfs::{
    Chunk, ProcessEvent, Result, StreamEvent, VfsApi, VfsProcess, VfsPty, VfsStream, VfsWatcher,
    WatchEvent,
};

enum StreamEntry {
    Local {
        stream: Box<dyn VfsStream>,
        readable: bool,
        writable: bool,
        resource: Option<u64>,
    },
    /// A PTY's terminal stream, addressed by stream id but owned by the
    /// PTY entry.
    PtyAlias { pid: u32 },
}

struct ProcessEntry {
    process: Box<dyn VfsProcess>,
    unreffed: bool,
    token: ProcessToken,
}

struct PtyEntry {
    pty: Box<dyn VfsPty>,
    stream_id: u16,
}

struct WatcherEntry {
    watcher: Box<dyn VfsWatcher>,
}

/// A newly stored stream: its token plus the event feed to pump.
pub struct StoredStream {
    /// Token to send to the peer.
    pub token: StreamToken,
    /// Event feed; `None` when the stream was already registered.
    pub events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

/// A newly stored process: its token, lifecycle events, and the event
/// feeds of its stdio streams.
pub struct StoredProcess {
    /// Token to send to the peer.
    pub token: ProcessToken,
    /// Lifecycle event feed; `None` when already registered.
    pub events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    /// Event feeds of the stdio streams registered alongside.
    pub stdio_events: Vec<(u16, mpsc::UnboundedReceiver<StreamEvent>)>,
}

/// A newly stored PTY: one token, two event feeds.
pub struct StoredPty {
    /// Token to send to the peer.
    pub token: PtyToken,
    /// Terminal stream event feed.
    pub stream_events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    /// Process lifecycle event feed.
    pub process_events: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
}

/// A newly stored watcher.
pub struct StoredWatcher {
    /// Token to send to the peer.
    pub token: WatcherToken,
    /// Change event feed.
    pub events: Option<mpsc::UnboundedReceiver<WatchEvent>>,
}

/// Live handle counts per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Local stream handles (including PTY aliases).
    pub streams: usize,
    /// Process handles.
    pub processes: usize,
    /// PTY handles.
    pub ptys: usize,
    /// Watcher handles.
    pub watchers: usize,
    /// Extension API handles.
    pub apis: usize,
}

impl RegistryStats {
    /// Whether no handles are live.
    pub fn is_empty(&self) -> bool {
        self.streams == 0
            && self.processes == 0
            && self.ptys == 0
            && self.watchers == 0
            && self.apis == 0
    }
}

/// The per-connection registry of live handles.
#[derive(Default)]
pub struct HandleRegistry {
    streams: HashMap<u16, StreamEntry>,
    processes: HashMap<u32, ProcessEntry>,
    process_stdio: HashMap<u32, Vec<u16>>,
    ptys: HashMap<u32, PtyEntry>,
    watchers: HashMap<u16, WatcherEntry>,
    apis: HashMap<String, Arc<Mutex<Box<dyn VfsApi>>>>,
    minted: HashMap<u64, u16>,
    next_stream_id: u16,
    next_watcher_id: u16,
}

fn next_ring_id(cursor: &mut u16, occupied: impl Fn(u16) -> bool) -> u16 {
    loop {
        *cursor = (*cursor + 1) % ID_RING;
        if *cursor == 0 {
            continue;
        }
        if !occupied(*cursor) {
            return *cursor;
        }
    }
}

impl HandleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_stream_id(&mut self) -> u16 {
        let streams = &self.streams;
        next_ring_id(&mut self.next_stream_id, |id| streams.contains_key(&id))
    }

    fn alloc_watcher_id(&mut self) -> u16 {
        let watchers = &self.watchers;
        next_ring_id(&mut self.next_watcher_id, |id| watchers.contains_key(&id))
    }

    /// Registers a stream and mints its token.
    ///
    /// Idempotent: a stream whose `resource_id` is already registered gets
    /// its previously minted token back, with no new event feed.
    pub fn store_stream(&mut self, mut stream: Box<dyn VfsStream>) -> StoredStream {
        let resource = stream.resource_id();
        if let Some(rid) = resource {
            if let Some(&id) = self.minted.get(&rid) {
                if let Some(StreamEntry::Local {
                    readable, writable, ..
                }) = self.streams.get(&id)
                {
                    return StoredStream {
                        token: StreamToken {
                            id,
                            readable: *readable,
                            writable: *writable,
                        },
                        events: None,
                    };
                }
            }
        }

        let id = self.alloc_stream_id();
        let events = stream.take_events();
        let readable = stream.is_readable();
        let writable = stream.is_writable();
        if let Some(rid) = resource {
            self.minted.insert(rid, id);
        }
        self.streams.insert(
            id,
            StreamEntry::Local {
                stream,
                readable,
                writable,
                resource,
            },
        );
        StoredStream {
            token: StreamToken {
                id,
                readable,
                writable,
            },
            events,
        }
    }

    /// Registers a process, its stdio streams, and mints its token.
    ///
    /// Idempotent on pid: re-storing a live pid returns the existing token.
    pub fn store_process(&mut self, mut process: Box<dyn VfsProcess>) -> StoredProcess {
        let pid = process.pid();
        if let Some(entry) = self.processes.get(&pid) {
            return StoredProcess {
                token: entry.token.clone(),
                events: None,
                stdio_events: Vec::new(),
            };
        }

        let events = process.take_events();
        let mut stdio_events = Vec::new();
        let mut stdio_ids = Vec::new();
        let store_stdio = |registry: &mut Self,
                               stream: Option<Box<dyn VfsStream>>,
                               stdio_events: &mut Vec<(u16, mpsc::UnboundedReceiver<StreamEvent>)>,
                               stdio_ids: &mut Vec<u16>|
         -> Option<StreamToken> {
            let stored = registry.store_stream(stream?);
            stdio_ids.push(stored.token.id);
            if let Some(rx) = stored.events {
                stdio_events.push((stored.token.id, rx));
            }
            Some(stored.token)
        };

        let stdin = store_stdio(self, process.take_stdin(), &mut stdio_events, &mut stdio_ids);
        let stdout = store_stdio(self, process.take_stdout(), &mut stdio_events, &mut stdio_ids);
        let stderr = store_stdio(self, process.take_stderr(), &mut stdio_events, &mut stdio_ids);

        let token = ProcessToken {
            pid,
            stdin,
            stdout,
            stderr,
        };
        self.process_stdio.insert(pid, stdio_ids);
        self.processes.insert(
            pid,
            ProcessEntry {
                process,
                unreffed: false,
                token: token.clone(),
            },
        );
        StoredProcess {
            token,
            events,
            stdio_events,
        }
    }

    /// Registers a PTY: one process-and-stream handle, one token.
    pub fn store_pty(&mut self, mut pty: Box<dyn VfsPty>) -> StoredPty {
        let pid = pty.pid();
        if let Some(entry) = self.ptys.get(&pid) {
            let id = entry.stream_id;
            return StoredPty {
                token: PtyToken {
                    pid,
                    id,
                    readable: entry.pty.is_readable(),
                    writable: entry.pty.is_writable(),
                },
                stream_events: None,
                process_events: None,
            };
        }

        let id = self.alloc_stream_id();
        let stream_events = pty.take_stream_events();
        let process_events = pty.take_process_events();
        let token = PtyToken {
            pid,
            id,
            readable: pty.is_readable(),
            writable: pty.is_writable(),
        };
        self.streams.insert(id, StreamEntry::PtyAlias { pid });
        self.ptys.insert(pid, PtyEntry { pty, stream_id: id });
        StoredPty {
            token,
            stream_events,
            process_events,
        }
    }

    /// Registers a watcher and mints its token.
    pub fn store_watcher(&mut self, mut watcher: Box<dyn VfsWatcher>) -> StoredWatcher {
        let id = self.alloc_watcher_id();
        let events = watcher.take_events();
        self.watchers.insert(id, WatcherEntry { watcher });
        StoredWatcher {
            token: WatcherToken { id },
            events,
        }
    }

    /// Registers an extension API under its name and mints its token.
    pub fn store_api(&mut self, api: Box<dyn VfsApi>) -> ApiToken {
        let token = ApiToken {
            name: api.name().to_string(),
            names: api.method_names(),
        };
        self.apis
            .insert(token.name.clone(), Arc::new(Mutex::new(api)));
        token
    }

    /// Looks up an extension API by name.
    pub fn lookup_api(&self, name: &str) -> Option<Arc<Mutex<Box<dyn VfsApi>>>> {
        self.apis.get(name).cloned()
    }

    /// Whether a stream id is live.
    pub fn has_stream(&self, id: u16) -> bool {
        self.streams.contains_key(&id)
    }

    /// Whether a pid is live (process or PTY).
    pub fn has_process(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid) || self.ptys.contains_key(&pid)
    }

    /// Whether a watcher id is live.
    pub fn has_watcher(&self, id: u16) -> bool {
        self.watchers.contains_key(&id)
    }

    /// Writes to a stream. `None` for unknown ids.
    pub fn stream_write(&mut self, id: u16, chunk: Chunk) -> Option<bool> {
        match self.streams.get_mut(&id)? {
            StreamEntry::Local { stream, .. } => Some(stream.write(chunk)),
            StreamEntry::PtyAlias { pid } => {
                let pid = *pid;
                self.ptys.get_mut(&pid).map(|e| e.pty.write(chunk))
            }
        }
    }

    /// Ends a stream's writable side.
    pub fn stream_end(&mut self, id: u16, chunk: Option<Chunk>) {
        match self.streams.get_mut(&id) {
            Some(StreamEntry::Local { stream, .. }) => stream.end(chunk),
            Some(StreamEntry::PtyAlias { pid }) => {
                let pid = *pid;
                if let Some(entry) = self.ptys.get_mut(&pid) {
                    entry.pty.end(chunk);
                }
            }
            None => {}
        }
    }

    /// Pauses a stream's readable side.
    pub fn stream_pause(&mut self, id: u16) {
        match self.streams.get_mut(&id) {
            Some(StreamEntry::Local { stream, .. }) => stream.pause(),
            Some(StreamEntry::PtyAlias { pid }) => {
                let pid = *pid;
                if let Some(entry) = self.ptys.get_mut(&pid) {
                    entry.pty.pause();
                }
            }
            None => {}
        }
    }

    /// Resumes a stream's readable side.
    pub fn stream_resume(&mut self, id: u16) {
        match self.streams.get_mut(&id) {
            Some(StreamEntry::Local { stream, .. }) => stream.resume(),
            Some(StreamEntry::PtyAlias { pid }) => {
                let pid = *pid;
                if let Some(entry) = self.ptys.get_mut(&pid) {
                    entry.pty.resume();
                }
            }
            None => {}
        }
    }

    /// Destroys a stream. The entry is removed when the stream emits its
    /// terminal close, keeping deletion atomic with the event.
    pub fn stream_destroy(&mut self, id: u16) {
        match self.streams.get_mut(&id) {
            Some(StreamEntry::Local { stream, .. }) => stream.destroy(),
            Some(StreamEntry::PtyAlias { pid }) => {
                let pid = *pid;
                if let Some(entry) = self.ptys.get_mut(&pid) {
                    entry.pty.destroy();
                }
            }
            None => {}
        }
    }

    /// Resumes every readable stream. Invoked on channel drain.
    pub fn resume_all_readables(&mut self) {
        let mut pty_pids = Vec::new();
        for entry in self.streams.values_mut() {
            match entry {
                StreamEntry::Local {
                    stream, readable, ..
                } if *readable => stream.resume(),
                StreamEntry::PtyAlias { pid } => pty_pids.push(*pid),
                _ => {}
            }
        }
        for pid in pty_pids {
            if let Some(entry) = self.ptys.get_mut(&pid) {
                if entry.pty.is_readable() {
                    entry.pty.resume();
                }
            }
        }
    }

    /// Drops a stream entry. Idempotent. Returns whether an entry existed.
    pub fn remove_stream(&mut self, id: u16) -> bool {
        match self.streams.remove(&id) {
            Some(StreamEntry::Local {
                resource: Some(rid),
                ..
            }) => {
                self.minted.remove(&rid);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Signals a process or PTY.
    pub fn process_kill(&mut self, pid: u32, signal: Option<i32>) {
        if let Some(entry) = self.processes.get_mut(&pid) {
            entry.process.kill(signal);
        } else if let Some(entry) = self.ptys.get_mut(&pid) {
            entry.pty.kill(signal);
        }
    }

    /// Detaches a process from disconnect teardown.
    pub fn process_unref(&mut self, pid: u32) {
        if let Some(entry) = self.processes.get_mut(&pid) {
            entry.process.unref();
            entry.unreffed = true;
        }
    }

    /// Resizes a PTY's terminal window.
    pub fn pty_resize(&mut self, pid: u32, cols: u16, rows: u16) -> Result<()> {
        match self.ptys.get_mut(&pid) {
            Some(entry) => entry.pty.resize(cols, rows),
            None => Ok(()),
        }
    }

    /// Drops a process entry on exit. Its stdio records survive until
    /// close so the stdio stream entries can still be cleaned up.
    pub fn remove_process(&mut self, pid: u32) -> bool {
        self.processes.remove(&pid).is_some()
    }

    /// Drops a process entry and its stdio stream entries on close.
    /// Returns the stdio stream ids that were removed.
    pub fn close_process(&mut self, pid: u32) -> Vec<u16> {
        self.processes.remove(&pid);
        let stdio = self.process_stdio.remove(&pid).unwrap_or_default();
        for id in &stdio {
            self.remove_stream(*id);
        }
        stdio
    }

    /// Whether a pid belongs to a PTY handle.
    pub fn is_pty(&self, pid: u32) -> bool {
        self.ptys.contains_key(&pid)
    }

    /// Drops a PTY entry and its stream alias. Returns the stream id.
    pub fn remove_pty(&mut self, pid: u32) -> Option<u16> {
        let entry = self.ptys.remove(&pid)?;
        self.streams.remove(&entry.stream_id);
        Some(entry.stream_id)
    }

    /// Closes and drops a watcher.
    pub fn close_watcher(&mut self, id: u16) {
        if let Some(mut entry) = self.watchers.remove(&id) {
            entry.watcher.close();
        }
    }

    /// Drops a watcher entry without closing it (it closed itself).
    pub fn remove_watcher(&mut self, id: u16) -> bool {
        self.watchers.remove(&id).is_some()
    }

    /// Teardown step 1: kill every non-unreffed process and PTY, drop all
    /// process entries.
    pub fn teardown_processes(&mut self) {
        for (_, mut entry) in self.processes.drain() {
            if !entry.unreffed {
                entry.process.kill(None);
            }
        }
        self.process_stdio.clear();
        for (_, mut entry) in self.ptys.drain() {
            entry.pty.kill(None);
        }
    }

    /// Teardown step 2: destroy every local stream and drop all entries.
    pub fn teardown_streams(&mut self) {
        for (_, entry) in self.streams.drain() {
            if let StreamEntry::Local { mut stream, .. } = entry {
                stream.destroy();
            }
        }
        self.minted.clear();
    }

    /// Teardown step 4: close every watcher.
    pub fn teardown_watchers(&mut self) {
        for (_, mut entry) in self.watchers.drain() {
            entry.watcher.close();
        }
    }

    /// Teardown step 5: drop every API silently.
    pub fn clear_apis(&mut self) {
        self.apis.clear();
    }

    /// Live handle counts.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            streams: self.streams.len(),
            processes: self.processes.len(),
            ptys: self.ptys.len(),
            watchers: self.watchers.len(),
            apis: self.apis.len(),
        }
    }
}
