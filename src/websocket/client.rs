use std::fmt;
use std::time::Duration;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{FrameSink, FrameStream};
use super::hub::Hub;
use crate::error::WebSocketError;

/// Identity of a single connection, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Registered,
    Live,
    Unregistering,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The client's queue is at capacity
    Full,
    /// The client's write loop is gone
    Closed,
}

/// The part of a client the hub keeps in its registry.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    peer: String,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    pub fn new(id: ClientId, peer: impl Into<String>, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            peer: peer.into(),
            outbound,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Never waits: a full queue is reported back to the caller instead.
    pub fn enqueue(&self, frame: Bytes) -> EnqueueOutcome {
        match self.outbound.try_send(frame) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }
}

/// Owns one connection's writing half and drains the outbound queue onto it.
pub struct Client<S: FrameSink> {
    id: ClientId,
    peer: String,
    hub: Hub,
    sink: S,
    outbound: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
    state: ClientState,
    admission: Option<oneshot::Receiver<()>>,
    reader: Option<JoinHandle<()>>,
}

impl<S: FrameSink> Client<S> {
    pub fn new(
        hub: Hub,
        sink: S,
        peer: impl Into<String>,
        queue_capacity: usize,
        write_timeout: Duration,
    ) -> (Self, ClientHandle) {
        let id = ClientId::new();
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(queue_capacity);

        let handle = ClientHandle::new(id, peer.clone(), tx);
        let client = Self {
            id,
            peer,
            hub,
            sink,
            outbound: rx,
            write_timeout,
            state: ClientState::Created,
            admission: None,
            reader: None,
        };
        (client, handle)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The hub fires the returned sender once the client is in the registry.
    pub(crate) fn admission(&mut self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.admission = Some(rx);
        tx
    }

    /// Ties the connection's read task to this client; closing aborts it.
    pub(crate) fn attach_reader(&mut self, reader: JoinHandle<()>) {
        self.reader = Some(reader);
    }

    /// Runs until the hub releases this client's queue.
    ///
    /// A failed or timed out write asks the hub to unregister the client and
    /// then keeps discarding frames until the hub has dropped its handle, so
    /// the connection is only closed once the client is out of the registry.
    pub async fn write_loop(mut self) {
        if let Some(admission) = self.admission.take() {
            if admission.await.is_err() {
                debug!("Client {} was never admitted", self.id);
                self.close().await;
                return;
            }
            self.transition(ClientState::Registered);
        }
        self.transition(ClientState::Live);

        match self.drain().await {
            Ok(()) => {
                debug!("Outbound queue released for client {}", self.id);
                self.transition(ClientState::Unregistering);
            }
            Err(e) => {
                warn!("Write to client {} ({}) failed: {}", self.id, self.peer, e);
                self.transition(ClientState::Unregistering);
                self.hub.unregister(self.id);

                while self.outbound.recv().await.is_some() {}
            }
        }

        self.close().await;
    }

    async fn drain(&mut self) -> Result<(), WebSocketError> {
        while let Some(frame) = self.outbound.recv().await {
            match timeout(self.write_timeout, self.sink.send(frame)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(WebSocketError::Timeout(self.write_timeout.as_millis() as u64));
                }
            }
        }
        Ok(())
    }

    /// Closes the underlying connection; later calls do nothing.
    ///
    /// Stops the read task as well and gives a peer that stopped reading at
    /// most one write timeout to take the close frame, so both halves of the
    /// connection are released once the client is dropped.
    pub async fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        self.transition(ClientState::Closed);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        match timeout(self.write_timeout, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing connection for client {}: {}", self.id, e),
            Err(_) => warn!("Timed out closing connection for client {} ({})", self.id, self.peer),
        }
        info!("Connection {} ({}) closed", self.id, self.peer);
    }

    fn transition(&mut self, next: ClientState) {
        if self.state == ClientState::Closed {
            return;
        }
        debug!("Client {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Reads until the peer goes away, then asks the hub to drop the client.
///
/// With `relay` set every inbound frame is re-broadcast verbatim to all other
/// clients.
pub(crate) async fn read_loop<R: FrameStream>(hub: Hub, id: ClientId, mut stream: R, relay: bool) {
    loop {
        match stream.receive().await {
            Some(Ok(frame)) => {
                if !relay {
                    debug!("Ignoring {} byte frame from client {}", frame.len(), id);
                    continue;
                }
                if let Err(e) = hub.broadcast_frame(frame, Some(id)) {
                    warn!("Failed to relay frame from client {}: {}", id, e);
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Error receiving from client {}: {}", id, e);
                break;
            }
            None => {
                info!("Client {} closed the connection", id);
                break;
            }
        }
    }

    hub.unregister(id);
}
