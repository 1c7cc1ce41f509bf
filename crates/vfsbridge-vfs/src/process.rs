//! Process and PTY capabilities.

use crate::error::{Result, VfsError};
use crate::stream::{Chunk, StreamEvent, VfsStream};
use tokio::sync::mpsc;

/// Event emitted by a child process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// The process exited. The entry is removed but stdio may still drain.
    Exit {
        /// Exit code.
        code: i32,
        /// Terminating signal name, when killed by one.
        signal: Option<String>,
    },
    /// The process and all of its stdio are done.
    Close {
        /// Exit code.
        code: i32,
        /// Terminating signal name, when killed by one.
        signal: Option<String>,
    },
    /// The PTY was killed out from under its consumer.
    PtyKill,
}

/// A live child process.
///
/// Stdio handles are taken once, at registration time; the registry stores
/// them as ordinary stream handles tied to the process entry.
pub trait VfsProcess: Send {
    /// Operating-system process id.
    fn pid(&self) -> u32;

    /// Takes the event feed. Returns `None` once already taken.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>>;

    /// Takes the stdin stream, if the process exposes one.
    fn take_stdin(&mut self) -> Option<Box<dyn VfsStream>>;

    /// Takes the stdout stream, if the process exposes one.
    fn take_stdout(&mut self) -> Option<Box<dyn VfsStream>>;

    /// Takes the stderr stream, if the process exposes one.
    fn take_stderr(&mut self) -> Option<Box<dyn VfsStream>>;

    /// Sends a signal to the process. `None` means the default signal.
    fn kill(&mut self, signal: Option<i32>);

    /// Detaches the process from disconnect teardown: an unreffed process
    /// outlives the connection that spawned it.
    fn unref(&mut self);
}

/// A live PTY: a process and a stream sharing one identity.
///
/// The stream side carries the terminal's byte traffic; the process side
/// carries lifecycle events. Implementations whose underlying PTY object
/// lacks pause/resume delegate those to the inner socket.
pub trait VfsPty: Send {
    /// Operating-system process id.
    fn pid(&self) -> u32;

    /// Whether the terminal stream produces data.
    fn is_readable(&self) -> bool;

    /// Whether the terminal stream accepts writes.
    fn is_writable(&self) -> bool;

    /// Takes the terminal stream's event feed.
    fn take_stream_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Takes the process lifecycle event feed.
    fn take_process_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>>;

    /// Writes terminal input. Returns `false` on backpressure.
    fn write(&mut self, chunk: Chunk) -> bool;

    /// Ends the writable side.
    fn end(&mut self, chunk: Option<Chunk>);

    /// Pauses terminal output.
    fn pause(&mut self);

    /// Resumes terminal output.
    fn resume(&mut self);

    /// Sends a signal to the process group.
    fn kill(&mut self, signal: Option<i32>);

    /// Tears the PTY down.
    fn destroy(&mut self);

    /// Resizes the terminal window.
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;
}

/// Builds the error a worker reports when a resize fails.
///
/// Resize failures are swallowed by the dispatcher; this exists for
/// implementations that want a uniform message in their own logs.
pub fn resize_error(pid: u32, cols: u16, rows: u16) -> VfsError {
    VfsError::message(format!(
        "failed to resize pty {} to {}x{}",
        pid, cols, rows
    ))
}
