//! Wire message types for the RPC channel.
//!
//! The channel beneath is assumed reliable, ordered, and message-oriented;
//! the codec is the embedder's concern. The helpers here encode to JSON
//! because tokens flatten passthrough scalars into their container, which
//! requires a self-describing format.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use vfsbridge_vfs::{ByteRange, Chunk, ErrorEnvelope};

/// Size of the rolling stream/watcher ID space. IDs cycle 1..9999.
pub const ID_RING: u16 = 10_000;

/// Wire serialization failure.
#[derive(Debug, Error)]
pub enum WireError {
    /// The message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Serialize a wire message to bytes.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(msg).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Deserialize a wire message from bytes.
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(data).map_err(|e| WireError::Serialization(e.to_string()))
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The peer-visible projection of a stream handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamToken {
    /// Registry id, unique among live streams.
    pub id: u16,
    /// Whether the stream produces data.
    #[serde(skip_serializing_if = "is_false", default)]
    pub readable: bool,
    /// Whether the stream accepts writes.
    #[serde(skip_serializing_if = "is_false", default)]
    pub writable: bool,
}

/// The peer-visible projection of a process handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessToken {
    /// Operating-system process id.
    pub pid: u32,
    /// Token for the process's stdin stream.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stdin: Option<StreamToken>,
    /// Token for the process's stdout stream.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stdout: Option<StreamToken>,
    /// Token for the process's stderr stream.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stderr: Option<StreamToken>,
}

/// The peer-visible projection of a PTY handle: a process and a stream
/// sharing one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyToken {
    /// Operating-system process id.
    pub pid: u32,
    /// Stream id of the terminal byte stream.
    pub id: u16,
    /// Whether the terminal stream produces data.
    #[serde(skip_serializing_if = "is_false", default)]
    pub readable: bool,
    /// Whether the terminal stream accepts writes.
    #[serde(skip_serializing_if = "is_false", default)]
    pub writable: bool,
}

/// The peer-visible projection of a watcher handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherToken {
    /// Registry id, unique among live watchers.
    pub id: u16,
}

/// The peer-visible projection of an extension API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    /// Registered API name.
    pub name: String,
    /// Callable method names.
    pub names: Vec<String>,
}

/// A marshalled operation result: resource slots replaced by tokens,
/// scalars passed through, absent fields dropped from the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaToken {
    /// Stream token, when the result carried a stream.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stream: Option<StreamToken>,
    /// Process token, when the result carried a process.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process: Option<ProcessToken>,
    /// PTY token, when the result carried a PTY.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pty: Option<PtyToken>,
    /// Watcher token, when the result carried a watcher.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub watcher: Option<WatcherToken>,
    /// API token, when the result carried an extension API.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api: Option<ApiToken>,

    /// Entity tag.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub etag: Option<String>,
    /// Conditional read matched; no body follows.
    #[serde(skip_serializing_if = "is_false", default)]
    pub not_modified: bool,
    /// The satisfied byte range.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub partial_content: Option<ByteRange>,
    /// The requested range cannot be satisfied.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_not_satisfiable: Option<String>,
    /// Media type.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime: Option<String>,
    /// Entity size in bytes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    /// Size of bundled metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata_size: Option<u64>,
    /// String length of bundled metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata_string_length: Option<u64>,

    /// Passthrough scalars, flattened into the token on the wire.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Operation options as they travel on the wire. A stream option arrives
/// as a token and is converted to a proxy before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOptions {
    /// Metadata-only request.
    #[serde(skip_serializing_if = "is_false", default)]
    pub head: bool,
    /// Etag for conditional reads.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub etag: Option<String>,
    /// Requested byte range.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range: Option<vfsbridge_vfs::RangeRequest>,
    /// Bundle stored metadata with the result.
    #[serde(skip_serializing_if = "is_false", default)]
    pub metadata: bool,
    /// Create missing parent directories.
    #[serde(skip_serializing_if = "is_false", default)]
    pub parents: bool,
    /// Buffer the whole write before committing.
    #[serde(skip_serializing_if = "is_false", default)]
    pub buffer_write: bool,
    /// Source path for rename/copy.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<String>,
    /// Link target for symlink.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    /// Metadata value to store.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata_value: Option<Value>,
    /// Requested text encoding.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub encoding: Option<String>,
    /// Token of a peer-side input stream.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stream: Option<StreamToken>,
    /// Passthrough options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireOptions {
    /// Rebuilds [`vfsbridge_vfs::OpOptions`], substituting an already
    /// constructed proxy for the stream token.
    pub fn into_options(
        self,
        stream: Option<Box<dyn vfsbridge_vfs::VfsStream>>,
    ) -> vfsbridge_vfs::OpOptions {
        vfsbridge_vfs::OpOptions {
            head: self.head,
            etag: self.etag,
            range: self.range,
            metadata: self.metadata,
            parents: self.parents,
            buffer_write: self.buffer_write,
            from: self.from,
            target: self.target,
            metadata_value: self.metadata_value,
            encoding: self.encoding,
            stream,
            extra: self.extra,
        }
    }
}

/// Routed VFS operations addressable over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// `resolve`
    Resolve,
    /// `stat`
    Stat,
    /// `metadata`
    Metadata,
    /// `readfile`
    Readfile,
    /// `readdir`
    Readdir,
    /// `mkfile`
    Mkfile,
    /// `mkdir`
    Mkdir,
    /// `mkdirP`
    #[serde(rename = "mkdirP")]
    MkdirP,
    /// `appendfile`
    Appendfile,
    /// `rmfile`
    Rmfile,
    /// `rmdir`
    Rmdir,
    /// `rename`
    Rename,
    /// `copy`
    Copy,
    /// `chmod`
    Chmod,
    /// `symlink`
    Symlink,
    /// `watch`
    Watch,
    /// `connect`
    Connect,
    /// `spawn`
    Spawn,
    /// `pty`
    Pty,
    /// `tmux`
    Tmux,
    /// `execFile`
    #[serde(rename = "execFile")]
    ExecFile,
    /// `extend`
    Extend,
    /// `unextend`
    Unextend,
    /// `use`
    #[serde(rename = "use")]
    Use,
}

impl OpKind {
    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Resolve => "resolve",
            OpKind::Stat => "stat",
            OpKind::Metadata => "metadata",
            OpKind::Readfile => "readfile",
            OpKind::Readdir => "readdir",
            OpKind::Mkfile => "mkfile",
            OpKind::Mkdir => "mkdir",
            OpKind::MkdirP => "mkdirP",
            OpKind::Appendfile => "appendfile",
            OpKind::Rmfile => "rmfile",
            OpKind::Rmdir => "rmdir",
            OpKind::Rename => "rename",
            OpKind::Copy => "copy",
            OpKind::Chmod => "chmod",
            OpKind::Symlink => "symlink",
            OpKind::Watch => "watch",
            OpKind::Connect => "connect",
            OpKind::Spawn => "spawn",
            OpKind::Pty => "pty",
            OpKind::Tmux => "tmux",
            OpKind::ExecFile => "execFile",
            OpKind::Extend => "extend",
            OpKind::Unextend => "unextend",
            OpKind::Use => "use",
        }
    }
}

/// Messages the peer sends to the worker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Inbound {
    /// Write to a local writable stream.
    Write {
        /// Target stream id.
        id: u16,
        /// Payload.
        chunk: Chunk,
    },
    /// End a local writable stream.
    End {
        /// Target stream id.
        id: u16,
        /// Optional final payload.
        #[serde(default)]
        chunk: Option<Chunk>,
    },
    /// Destroy a local readable stream.
    Destroy {
        /// Target stream id.
        id: u16,
    },
    /// Pause a local readable stream.
    Pause {
        /// Target stream id.
        id: u16,
    },
    /// Resume a local readable stream.
    Resume {
        /// Target stream id.
        id: u16,
    },
    /// Peer pushes data into one of our proxy streams.
    OnData {
        /// Proxy stream id (peer-allocated).
        id: u16,
        /// Payload.
        chunk: Chunk,
    },
    /// Peer ended one of our proxy streams.
    OnEnd {
        /// Proxy stream id.
        id: u16,
        /// Optional final payload.
        #[serde(default)]
        chunk: Option<Chunk>,
    },
    /// Peer closed one of our proxy streams.
    OnClose {
        /// Proxy stream id.
        id: u16,
    },
    /// Signal a registered process.
    Kill {
        /// Target pid.
        pid: u32,
        /// Signal to send; `None` means the default.
        #[serde(default)]
        signal: Option<i32>,
    },
    /// Detach a process from disconnect teardown.
    Unref {
        /// Target pid.
        pid: u32,
    },
    /// Resize a PTY. Failures are swallowed.
    Resize {
        /// Target pid.
        pid: u32,
        /// New column count.
        cols: u16,
        /// New row count.
        rows: u16,
    },
    /// Close a watcher.
    CloseWatcher {
        /// Target watcher id.
        id: u16,
    },
    /// Invoke a method on a registered extension API.
    Call {
        /// Reply sequence; required for a response.
        #[serde(default)]
        seq: Option<u64>,
        /// API name.
        api: String,
        /// Method name.
        fn_name: String,
        /// JSON arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Subscribe to a named VFS event.
    Subscribe {
        /// Event name.
        name: String,
    },
    /// Remove a named-event subscription.
    Unsubscribe {
        /// Event name.
        name: String,
    },
    /// Emit a named event into the VFS.
    EmitEvent {
        /// Event name.
        name: String,
        /// Event payload.
        value: Value,
    },
    /// Liveness probe.
    Ping {
        /// Reply sequence; required for a response.
        #[serde(default)]
        seq: Option<u64>,
        /// Report elapsed worker uptime as `serverTime`.
        #[serde(default)]
        server_time: bool,
    },
    /// A routed VFS operation.
    Op {
        /// Reply sequence; an operation without one is refused.
        #[serde(default)]
        seq: Option<u64>,
        /// Which operation.
        op: OpKind,
        /// Target path; `None` fails fast with `EINVALIDPATH`.
        #[serde(default)]
        path: Option<String>,
        /// Operation options.
        #[serde(default)]
        options: WireOptions,
    },
    /// Kill a process tree (pid-addressed, not path-addressed).
    Killtree {
        /// Reply sequence; an operation without one is refused.
        #[serde(default)]
        seq: Option<u64>,
        /// Root pid of the tree.
        pid: u32,
        /// Operation options.
        #[serde(default)]
        options: WireOptions,
    },
}

/// Messages the worker sends to the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Outbound {
    /// Data from a registered local stream.
    OnData {
        /// Source stream id.
        id: u16,
        /// Payload.
        chunk: Chunk,
    },
    /// A registered local stream ended.
    OnEnd {
        /// Source stream id.
        id: u16,
        /// Optional final payload.
        #[serde(default)]
        chunk: Option<Chunk>,
    },
    /// A registered local stream closed.
    OnClose {
        /// Source stream id.
        id: u16,
    },
    /// A registered local stream failed. Not terminal by itself.
    OnError {
        /// Source stream id.
        id: u16,
        /// Serialized failure.
        error: ErrorEnvelope,
    },
    /// A registered process exited.
    OnExit {
        /// Source pid.
        pid: u32,
        /// Exit code.
        code: i32,
        /// Terminating signal, when killed by one.
        #[serde(default)]
        signal: Option<String>,
    },
    /// A registered process and its stdio are done.
    OnProcessClose {
        /// Source pid.
        pid: u32,
        /// Exit code.
        code: i32,
        /// Terminating signal, when killed by one.
        #[serde(default)]
        signal: Option<String>,
    },
    /// A registered PTY was killed.
    OnPtyKill {
        /// Source pid.
        pid: u32,
    },
    /// A registered watcher observed a change.
    OnChange {
        /// Source watcher id.
        id: u16,
        /// Kind of change.
        event: String,
        /// Affected entry name.
        filename: String,
        /// Stat of the affected entry.
        #[serde(default)]
        stat: Option<Value>,
        /// Affected entries for batched events.
        #[serde(default)]
        files: Option<Value>,
    },
    /// A subscribed named event fired.
    OnEvent {
        /// Event name.
        name: String,
        /// Event payload.
        value: Value,
    },
    /// Response to a sequenced request.
    Reply {
        /// Echoed sequence.
        seq: u64,
        /// Failure envelope, when the operation failed.
        #[serde(default)]
        error: Option<ErrorEnvelope>,
        /// Marshalled result, when the operation succeeded.
        #[serde(default)]
        meta: Option<MetaToken>,
    },
    /// Write to a peer-side stream one of our proxies stands in for.
    Write {
        /// Peer stream id.
        id: u16,
        /// Payload.
        chunk: Chunk,
    },
    /// End a peer-side stream.
    End {
        /// Peer stream id.
        id: u16,
        /// Optional final payload.
        #[serde(default)]
        chunk: Option<Chunk>,
    },
    /// Destroy a peer-side stream.
    Destroy {
        /// Peer stream id.
        id: u16,
    },
    /// Pause a peer-side stream.
    Pause {
        /// Peer stream id.
        id: u16,
    },
    /// Resume a peer-side stream.
    Resume {
        /// Peer stream id.
        id: u16,
    },
}

/// The message channel to the peer.
///
/// Assumed reliable, ordered, and message-oriented. `send` returning
/// `false` means the transport buffer is full; the worker applies
/// backpressure until the embedder signals drain through
/// [`crate::WorkerHandle::drain`].
pub trait Channel: Send + Sync {
    /// Queues a message for the peer.
    fn send(&self, msg: Outbound) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_token_skips_false_flags() {
        let token = StreamToken {
            id: 3,
            readable: true,
            writable: false,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "{\"id\":3,\"readable\":true}");
    }

    #[test]
    fn meta_token_flattens_extra() {
        let mut token = MetaToken {
            mime: Some("text/plain".to_string()),
            ..Default::default()
        };
        token
            .extra
            .insert("serverTime".to_string(), Value::from(12));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["mime"], "text/plain");
        assert_eq!(json["serverTime"], 12);
        assert!(json.get("stream").is_none());
        assert!(json.get("notModified").is_none());
    }

    #[test]
    fn inbound_round_trip() {
        let msg = Inbound::Op {
            seq: Some(7),
            op: OpKind::Readfile,
            path: Some("/x".to_string()),
            options: WireOptions::default(),
        };
        let bytes = encode_message(&msg).unwrap();
        let back: Inbound = decode_message(&bytes).unwrap();
        match back {
            Inbound::Op { seq, op, path, .. } => {
                assert_eq!(seq, Some(7));
                assert_eq!(op, OpKind::Readfile);
                assert_eq!(path.as_deref(), Some("/x"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn op_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&OpKind::MkdirP).unwrap(),
            "\"mkdirP\""
        );
        assert_eq!(
            serde_json::to_string(&OpKind::ExecFile).unwrap(),
            "\"execFile\""
        );
        assert_eq!(serde_json::to_string(&OpKind::Use).unwrap(), "\"use\"");
        assert_eq!(OpKind::Readdir.name(), "readdir");
    }

    #[test]
    fn outbound_reply_round_trip() {
        let msg = Outbound::Reply {
            seq: 9,
            error: None,
            meta: Some(MetaToken {
                stream: Some(StreamToken {
                    id: 1,
                    readable: true,
                    writable: false,
                }),
                ..Default::default()
            }),
        };
        let bytes = encode_message(&msg).unwrap();
        let back: Outbound = decode_message(&bytes).unwrap();
        match back {
            Outbound::Reply { seq, error, meta } => {
                assert_eq!(seq, 9);
                assert!(error.is_none());
                assert_eq!(meta.unwrap().stream.unwrap().id, 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn wire_options_into_options() {
        let wire = WireOptions {
            parents: true,
            from: Some("/src".to_string()),
            ..Default::default()
        };
        let options = wire.into_options(None);
        assert!(options.parents);
        assert_eq!(options.from.as_deref(), Some("/src"));
        assert!(options.stream.is_none());
    }
}
