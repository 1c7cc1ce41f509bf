#![warn(missing_docs)]

//! VFS contract for the vfsbridge access bridge.
//!
//! This crate defines the types both bridge surfaces (the RPC worker and the
//! HTTP gateway) consume:
//! - The [`Vfs`] operation trait: filesystem, process, watcher, and
//!   extension operations, each returning a [`Meta`] result
//! - Capability traits for live resources a `Meta` may carry:
//!   [`VfsStream`], [`VfsProcess`], [`VfsPty`], [`VfsWatcher`], [`VfsApi`]
//! - Error codes, [`VfsError`], and the serializable [`ErrorEnvelope`]

pub mod api;
pub mod error;
pub mod meta;
pub mod options;
pub mod process;
pub mod stream;
pub mod vfs;
pub mod watch;

pub use api::VfsApi;
pub use error::{ErrorCode, ErrorEnvelope, Result, VfsError};
pub use meta::{ByteRange, Meta};
pub use options::{OpOptions, RangeRequest};
pub use process::{ProcessEvent, VfsProcess, VfsPty};
pub use stream::{Chunk, StreamEvent, VfsStream};
pub use vfs::Vfs;
pub use watch::{VfsWatcher, WatchEvent};
