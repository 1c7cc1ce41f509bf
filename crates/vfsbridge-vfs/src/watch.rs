//! File-system watcher capability.

use serde_json::Value;
use tokio::sync::mpsc;

/// Event emitted by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Something under the watched path changed.
    Change {
        /// Kind of change (`"change"`, `"rename"`, ...).
        event: String,
        /// Name of the affected entry.
        filename: String,
        /// Stat of the affected entry, when the watcher provides one.
        stat: Option<Value>,
        /// Affected entries for batched directory events.
        files: Option<Value>,
    },
}

/// A live file-system watcher.
pub trait VfsWatcher: Send {
    /// Takes the event feed. Returns `None` once already taken.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<WatchEvent>>;

    /// Stops watching. No further events are delivered.
    fn close(&mut self);
}
