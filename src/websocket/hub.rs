//! Hub owning the registry of live clients.
//!
//! Every registry mutation and every broadcast enumeration is a command
//! applied by [`HubLoop::run`], one per iteration. Callers only ever push
//! commands onto an unbounded channel, so none of the entry points wait on
//! the loop or on any client.

use std::sync::Arc;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::client::{read_loop, Client, ClientHandle, ClientId};
use super::connection::Connection;
use super::registry::Registry;
use crate::config::HubConfig;
use crate::error::WebSocketError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub admitted: u64,
    pub broadcasts: u64,
    pub slow_disconnects: u64,
}

enum Command {
    Register {
        client: ClientHandle,
        admitted: Option<oneshot::Sender<()>>,
    },
    Unregister(ClientId),
    Broadcast {
        frame: Bytes,
        exclude: Option<ClientId>,
    },
    Clients(oneshot::Sender<Vec<ClientId>>),
    Stats(oneshot::Sender<HubStats>),
    Shutdown,
}

/// Cheap to clone handle used by everything outside the coordination loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<HubConfig>,
}

/// The coordination loop. Consumed by [`HubLoop::run`], so it runs at most once.
pub struct HubLoop {
    commands: mpsc::UnboundedReceiver<Command>,
    registry: Registry,
    stats: HubStats,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            commands: tx,
            config: Arc::new(config),
        };
        let hub_loop = HubLoop {
            commands: rx,
            registry: Registry::new(),
            stats: HubStats::default(),
        };
        (hub, hub_loop)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Submits a client for admission.
    pub fn register(&self, client: ClientHandle) -> Result<(), WebSocketError> {
        self.submit(client, None)
    }

    fn submit(
        &self,
        client: ClientHandle,
        admitted: Option<oneshot::Sender<()>>,
    ) -> Result<(), WebSocketError> {
        self.commands
            .send(Command::Register { client, admitted })
            .map_err(|_| WebSocketError::HubClosed)
    }

    /// Submits a client for removal. Unknown ids and a stopped hub are ignored.
    pub fn unregister(&self, id: ClientId) {
        if self.commands.send(Command::Unregister(id)).is_err() {
            debug!("Hub already stopped, nothing to unregister for {}", id);
        }
    }

    /// Serializes `payload` once and fans it out to every client but `exclude`.
    pub fn broadcast<T>(&self, payload: &T, exclude: Option<ClientId>) -> Result<(), WebSocketError>
    where
        T: Serialize + ?Sized,
    {
        let frame = Bytes::from(serde_json::to_vec(payload)?);
        self.broadcast_frame(frame, exclude)
    }

    /// Fans out an already serialized frame.
    pub fn broadcast_frame(&self, frame: Bytes, exclude: Option<ClientId>) -> Result<(), WebSocketError> {
        self.commands
            .send(Command::Broadcast { frame, exclude })
            .map_err(|_| WebSocketError::HubClosed)
    }

    /// Snapshot of the live client ids, taken after every previously
    /// submitted command has been applied.
    pub async fn clients(&self) -> Result<Vec<ClientId>, WebSocketError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Clients(tx))
            .map_err(|_| WebSocketError::HubClosed)?;
        rx.await.map_err(|_| WebSocketError::HubClosed)
    }

    pub async fn stats(&self) -> Result<HubStats, WebSocketError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| WebSocketError::HubClosed)?;
        rx.await.map_err(|_| WebSocketError::HubClosed)
    }

    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("Hub already stopped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Turns an upgraded connection into a registered, running client.
    ///
    /// Spawns the client's write loop and a read loop that unregisters the
    /// client when the peer goes away. Must be called inside a tokio runtime.
    pub fn connect<C: Connection>(&self, connection: C) -> Result<ClientId, WebSocketError> {
        let peer = connection.peer();
        let (sink, stream) = connection.split();
        let (mut client, handle) = Client::new(
            self.clone(),
            sink,
            peer.clone(),
            self.config.queue_capacity,
            self.config.write_timeout(),
        );
        let id = client.id();

        let admitted = client.admission();
        if let Err(e) = self.submit(handle, Some(admitted)) {
            error!("Rejecting client {} ({}): {}", id, peer, e);
            tokio::spawn(async move { client.close().await });
            return Err(e);
        }

        let reader = tokio::spawn(read_loop(self.clone(), id, stream, self.config.relay_inbound));
        client.attach_reader(reader);
        tokio::spawn(client.write_loop());

        Ok(id)
    }
}

impl HubLoop {
    pub async fn run(mut self) {
        info!("Hub coordination loop started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register { client, admitted } => self.on_connect(client, admitted),
                Command::Unregister(id) => self.on_disconnect(id),
                Command::Broadcast { frame, exclude } => self.on_broadcast(frame, exclude),
                Command::Clients(reply) => {
                    let _ = reply.send(self.registry.ids());
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => {
                    info!("Hub shutdown requested");
                    break;
                }
            }
        }

        // Stop accepting commands; anything still queued is dropped with the receiver
        self.commands.close();
        let released = self.registry.clear();
        info!("Hub coordination loop stopped, released {} clients", released);
    }

    fn on_connect(&mut self, client: ClientHandle, admitted: Option<oneshot::Sender<()>>) {
        let id = client.id();
        let peer = client.peer().to_string();

        if self.registry.add(client) {
            self.stats.admitted += 1;
            if let Some(admitted) = admitted {
                let _ = admitted.send(());
            }
            info!("Client connected {} ({}), total={}", id, peer, self.registry.len());
        } else {
            warn!("Client {} ({}) is already registered, ignoring", id, peer);
        }
    }

    fn on_disconnect(&mut self, id: ClientId) {
        match self.registry.remove(&id) {
            Some(client) => {
                info!("Client disconnected {} ({}), total={}", id, client.peer(), self.registry.len());
            }
            None => debug!("Client {} not registered, nothing to remove", id),
        }
    }

    fn on_broadcast(&mut self, frame: Bytes, exclude: Option<ClientId>) {
        self.stats.broadcasts += 1;
        let report = self.registry.broadcast(&frame, exclude);

        for id in report.full {
            if let Some(client) = self.registry.remove(&id) {
                self.stats.slow_disconnects += 1;
                warn!("Disconnecting slow client {} ({}): outbound queue full", id, client.peer());
            }
        }
        for id in report.closed {
            self.registry.remove(&id);
        }
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            clients: self.registry.len(),
            ..self.stats.clone()
        }
    }
}
