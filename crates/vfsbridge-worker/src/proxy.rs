//! Peer-side stream stand-ins.
//!
//! A proxy is built from a stream token that arrived in operation options:
//! the peer owns the real stream, we hand the VFS a local object whose
//! writes and controls are forwarded over the channel and whose events are
//! fed by the peer's `onData`/`onEnd`/`onClose` pushes.

use crate::wire::{Channel, Outbound, StreamToken};
use std::sync::Arc;
use tokio::sync::mpsc;
use vfsbridge_vfs::{Chunk, StreamEvent, VfsStream};

/// Local stand-in for a peer-side stream.
pub struct ProxyStream {
    id: u16,
    readable: bool,
    writable: bool,
    channel: Arc<dyn Channel>,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
}

/// The worker's routing entry for a proxy: pushes peer events into the
/// proxy's local event feed.
pub struct ProxyHandle {
    /// Peer-allocated stream id.
    pub id: u16,
    /// Whether the peer stream produces data.
    pub readable: bool,
    /// Whether the peer stream accepts writes.
    pub writable: bool,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ProxyStream {
    /// Builds a proxy and its routing handle from a token.
    pub fn new(token: &StreamToken, channel: Arc<dyn Channel>) -> (Self, ProxyHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let proxy = Self {
            id: token.id,
            readable: token.readable,
            writable: token.writable,
            channel,
            events: Some(rx),
        };
        let handle = ProxyHandle {
            id: token.id,
            readable: token.readable,
            writable: token.writable,
            tx,
        };
        (proxy, handle)
    }
}

impl VfsStream for ProxyStream {
    fn is_readable(&self) -> bool {
        self.readable
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        self.events.take()
    }

    fn write(&mut self, chunk: Chunk) -> bool {
        if !self.writable {
            return true;
        }
        self.channel.send(Outbound::Write { id: self.id, chunk })
    }

    fn end(&mut self, chunk: Option<Chunk>) {
        if !self.writable {
            return;
        }
        self.channel.send(Outbound::End { id: self.id, chunk });
    }

    fn pause(&mut self) {
        if self.readable {
            self.channel.send(Outbound::Pause { id: self.id });
        }
    }

    fn resume(&mut self) {
        if self.readable {
            self.channel.send(Outbound::Resume { id: self.id });
        }
    }

    fn destroy(&mut self) {
        if self.readable {
            self.channel.send(Outbound::Destroy { id: self.id });
        }
    }
}

impl ProxyHandle {
    /// Peer pushed a data chunk.
    pub fn push_data(&self, chunk: Chunk) {
        let _ = self.tx.send(StreamEvent::Data(chunk));
    }

    /// Peer ended the stream. The proxy stays registered until close.
    pub fn push_end(&self, chunk: Option<Chunk>) {
        let _ = self.tx.send(StreamEvent::End(chunk));
    }

    /// Peer closed the stream.
    pub fn push_close(&self) {
        let _ = self.tx.send(StreamEvent::Close);
    }

    /// The channel drained; local writers may continue.
    pub fn push_drain(&self) {
        let _ = self.tx.send(StreamEvent::Drain);
    }
}
