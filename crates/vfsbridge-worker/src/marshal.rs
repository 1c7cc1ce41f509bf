//! Result marshalling at the wire boundary.
//!
//! A VFS result may carry live resources; the peer can only hold tokens.
//! `project_meta` walks the result's resource slots, registers each live
//! resource, and substitutes the minted token; scalar fields pass through
//! unchanged and absent fields stay absent. Errors become serializable
//! envelopes with the worker's pid prefixed onto the stack.

use crate::registry::HandleRegistry;
use crate::wire::MetaToken;
use tokio::sync::mpsc;
use vfsbridge_vfs::{ErrorEnvelope, Meta, ProcessEvent, StreamEvent, VfsError, WatchEvent};

/// An event feed taken from a freshly registered resource, tagged with the
/// handle it belongs to. The worker pumps each feed into its input queue.
pub enum HandleEvents {
    /// A local stream's events.
    Stream {
        /// Registry stream id.
        id: u16,
        /// The feed.
        rx: mpsc::UnboundedReceiver<StreamEvent>,
    },
    /// A process's (or PTY's) lifecycle events.
    Process {
        /// Process id.
        pid: u32,
        /// The feed.
        rx: mpsc::UnboundedReceiver<ProcessEvent>,
    },
    /// A watcher's change events.
    Watcher {
        /// Registry watcher id.
        id: u16,
        /// The feed.
        rx: mpsc::UnboundedReceiver<WatchEvent>,
    },
}

/// A projected result: the token to send plus the event feeds to pump.
pub struct MarshalledMeta {
    /// Serializable projection for the peer.
    pub token: MetaToken,
    /// Event feeds of every resource registered during projection.
    pub events: Vec<HandleEvents>,
}

/// Registers every live resource in `meta` and builds the wire token.
pub fn project_meta(registry: &mut HandleRegistry, meta: Meta) -> MarshalledMeta {
    let mut token = MetaToken::default();
    let mut events = Vec::new();

    if let Some(stream) = meta.stream {
        let stored = registry.store_stream(stream);
        if let Some(rx) = stored.events {
            events.push(HandleEvents::Stream {
                id: stored.token.id,
                rx,
            });
        }
        token.stream = Some(stored.token);
    }

    if let Some(process) = meta.process {
        let stored = registry.store_process(process);
        if let Some(rx) = stored.events {
            events.push(HandleEvents::Process {
                pid: stored.token.pid,
                rx,
            });
        }
        for (id, rx) in stored.stdio_events {
            events.push(HandleEvents::Stream { id, rx });
        }
        token.process = Some(stored.token);
    }

    if let Some(pty) = meta.pty {
        let stored = registry.store_pty(pty);
        if let Some(rx) = stored.stream_events {
            events.push(HandleEvents::Stream {
                id: stored.token.id,
                rx,
            });
        }
        if let Some(rx) = stored.process_events {
            events.push(HandleEvents::Process {
                pid: stored.token.pid,
                rx,
            });
        }
        token.pty = Some(stored.token);
    }

    if let Some(watcher) = meta.watcher {
        let stored = registry.store_watcher(watcher);
        if let Some(rx) = stored.events {
            events.push(HandleEvents::Watcher {
                id: stored.token.id,
                rx,
            });
        }
        token.watcher = Some(stored.token);
    }

    if let Some(api) = meta.api {
        token.api = Some(registry.store_api(api));
    }

    token.etag = meta.etag;
    token.not_modified = meta.not_modified;
    token.partial_content = meta.partial_content;
    token.range_not_satisfiable = meta.range_not_satisfiable;
    token.mime = meta.mime;
    token.size = meta.size;
    token.metadata_size = meta.metadata_size;
    token.metadata_string_length = meta.metadata_string_length;
    token.extra = meta.extra;

    MarshalledMeta { token, events }
}

/// Projects an error for the wire, prefixing this worker's pid.
pub fn project_error(err: &VfsError) -> ErrorEnvelope {
    ErrorEnvelope::from_error(std::process::id(), err)
}
