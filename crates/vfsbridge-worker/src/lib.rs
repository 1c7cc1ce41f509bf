//! RPC worker for the vfsbridge access bridge.
//!
//! The worker brokers long-lived references to mutable, event-emitting
//! resources (streams, processes, PTYs, watchers, extension APIs) across a
//! message channel that can pause, drain, or die at any time. It provides:
//! - A per-connection handle registry with a rolling token protocol
//! - Proxy streams standing in for peer-side streams
//! - Result marshalling: live resources become serializable tokens
//! - End-to-end backpressure driven by channel drain signals
//! - Deterministic teardown of every remote-visible resource on disconnect

pub mod dispatch;
pub mod flow;
pub mod marshal;
pub mod proxy;
pub mod registry;
pub mod wire;

pub use dispatch::{Worker, WorkerHandle, WorkerInput};
pub use flow::FlowController;
pub use marshal::{project_error, project_meta, HandleEvents, MarshalledMeta};
pub use proxy::{ProxyHandle, ProxyStream};
pub use registry::{HandleRegistry, RegistryStats};
pub use wire::{
    decode_message, encode_message, ApiToken, Channel, Inbound, MetaToken, OpKind, Outbound,
    ProcessToken, PtyToken, StreamToken, WatcherToken, WireError, WireOptions,
};
