//! The VFS operation trait both bridge surfaces consume.

use crate::error::{ErrorCode, Result, VfsError};
use crate::meta::Meta;
use crate::options::OpOptions;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

fn unsupported(op: &str) -> VfsError {
    VfsError::new(
        ErrorCode::Other("ENOSYS".to_string()),
        format!("operation not supported: {}", op),
    )
}

/// The virtual file system the bridge exposes.
///
/// Every operation takes a path (or a name/pid where noted) plus
/// [`OpOptions`] and resolves to a [`Meta`]. Operations an implementation
/// does not support fall back to an `ENOSYS` failure, mirroring a backing
/// service that simply lacks the handler.
///
/// Path sanitization is this layer's responsibility; the bridge forwards
/// paths as received.
#[allow(unused_variables)]
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Resolves a path to its canonical form.
    async fn resolve(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("resolve"))
    }

    /// Stats an entry.
    async fn stat(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("stat"))
    }

    /// Reads or writes stored metadata for an entry.
    async fn metadata(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("metadata"))
    }

    /// Opens a file for reading; the result carries a byte stream.
    async fn readfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("readfile"))
    }

    /// Lists a directory; the result carries an object-mode entry stream.
    async fn readdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("readdir"))
    }

    /// Creates or replaces a file from `options.stream`.
    async fn mkfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("mkfile"))
    }

    /// Creates a directory.
    async fn mkdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("mkdir"))
    }

    /// Creates a directory and any missing parents.
    async fn mkdirp(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("mkdirP"))
    }

    /// Appends `options.stream` to a file.
    async fn appendfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("appendfile"))
    }

    /// Removes a file.
    async fn rmfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("rmfile"))
    }

    /// Removes a directory.
    async fn rmdir(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("rmdir"))
    }

    /// Renames `options.from` to `path`.
    async fn rename(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("rename"))
    }

    /// Copies `options.from` to `path`.
    async fn copy(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("copy"))
    }

    /// Changes entry permissions.
    async fn chmod(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("chmod"))
    }

    /// Creates a symlink at `path` pointing at `options.target`.
    async fn symlink(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("symlink"))
    }

    /// Watches a path; the result carries a watcher.
    async fn watch(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("watch"))
    }

    /// Connects to a service endpoint; the result carries a duplex stream.
    async fn connect(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("connect"))
    }

    /// Spawns a child process; the result carries a process.
    async fn spawn(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("spawn"))
    }

    /// Spawns a process attached to a pseudo-terminal; the result carries
    /// a PTY.
    async fn pty(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("pty"))
    }

    /// Attaches to a tmux session; the result carries a PTY.
    async fn tmux(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("tmux"))
    }

    /// Executes a file to completion, capturing output.
    async fn execfile(&self, path: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("execFile"))
    }

    /// Kills a process and its descendants.
    async fn killtree(&self, pid: u32, options: OpOptions) -> Result<Meta> {
        Err(unsupported("killtree"))
    }

    /// Registers an extension API under a name.
    async fn extend(&self, name: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("extend"))
    }

    /// Removes a registered extension API.
    async fn unextend(&self, name: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("unextend"))
    }

    /// Fetches a registered extension API; the result carries an api slot.
    async fn use_api(&self, name: &str, options: OpOptions) -> Result<Meta> {
        Err(unsupported("use"))
    }

    /// Scalar environment the VFS exposes to consumers.
    fn env(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Subscribes to a named event. Dropping the receiver unsubscribes;
    /// implementations prune subscribers whose receiver is gone.
    fn subscribe_event(&self, name: &str) -> mpsc::UnboundedReceiver<Value> {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    /// Emits a named event to local subscribers.
    fn emit_event(&self, name: &str, value: Value) {}
}
