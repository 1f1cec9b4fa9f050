//! In-process connection pair, for embedding the hub without a network and
//! for exercising it in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::connection::{Connection, FrameSink, FrameStream};
use crate::error::WebSocketError;

#[derive(Debug, Default)]
struct Control {
    closes: AtomicUsize,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    stall_closes: AtomicBool,
}

/// Hub-side end of the pair.
pub struct MemoryConnection {
    peer: String,
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: mpsc::UnboundedReceiver<Bytes>,
    control: Arc<Control>,
}

/// Remote end of the pair, driven by the test or embedding code.
pub struct MemoryPeer {
    received: mpsc::UnboundedReceiver<Bytes>,
    sender: Option<mpsc::UnboundedSender<Bytes>>,
    control: Arc<Control>,
}

pub struct MemorySink {
    outgoing: Option<mpsc::UnboundedSender<Bytes>>,
    control: Arc<Control>,
}

pub struct MemoryStream {
    incoming: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryConnection {
    pub fn pair(peer: impl Into<String>) -> (MemoryConnection, MemoryPeer) {
        let (to_peer, received) = mpsc::unbounded_channel();
        let (from_peer, incoming) = mpsc::unbounded_channel();
        let control = Arc::new(Control::default());

        let connection = MemoryConnection {
            peer: peer.into(),
            outgoing: to_peer,
            incoming,
            control: control.clone(),
        };
        let remote = MemoryPeer {
            received,
            sender: Some(from_peer),
            control,
        };
        (connection, remote)
    }
}

impl Connection for MemoryConnection {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn split(self) -> (MemorySink, MemoryStream) {
        let sink = MemorySink {
            outgoing: Some(self.outgoing),
            control: self.control,
        };
        (sink, MemoryStream { incoming: self.incoming })
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), WebSocketError> {
        if self.control.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.control.fail_writes.load(Ordering::SeqCst) {
            return Err(WebSocketError::SendError("write rejected by peer".into()));
        }

        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| WebSocketError::ConnectionError("connection closed".into()))?;
        outgoing
            .send(frame)
            .map_err(|_| WebSocketError::ConnectionError("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), WebSocketError> {
        self.control.closes.fetch_add(1, Ordering::SeqCst);
        if self.control.stall_closes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.outgoing.take();
        Ok(())
    }
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn receive(&mut self) -> Option<Result<Bytes, WebSocketError>> {
        self.incoming.recv().await.map(Ok)
    }
}

impl MemoryPeer {
    /// Next frame written by the hub, `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.received.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.received.try_recv().ok()
    }

    /// Sends a frame to the hub; false once disconnected.
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        match &self.sender {
            Some(sender) => sender.send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Hangs up, which the hub side reads as end of stream.
    pub fn disconnect(&mut self) {
        self.sender.take();
    }

    /// Every subsequent write from the hub fails.
    pub fn fail_writes(&self) {
        self.control.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Every subsequent write from the hub never completes.
    pub fn stall_writes(&self) {
        self.control.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Closing the connection from the hub side never completes.
    pub fn stall_closes(&self) {
        self.control.stall_closes.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.control.closes.load(Ordering::SeqCst)
    }
}
