//! Integration harness and scenario tests for the vfsbridge workspace.
//!
//! The harness provides scripted resources (streams, processes, PTYs,
//! watchers, APIs), a recording channel, a programmable VFS, and an
//! in-memory VFS; the test modules drive the RPC worker and the HTTP
//! gateway end to end against them.

pub mod harness;
pub mod memory_vfs;

#[cfg(test)]
mod gateway_integration;
#[cfg(test)]
mod worker_integration;

pub use harness::{
    collect_response_body, collect_stream_bytes, MockChannel, ScriptApi, ScriptPartSource,
    ScriptProcess, ScriptPty, ScriptStream, ScriptVfs, ScriptWatcher,
};
pub use memory_vfs::MemoryVfs;
