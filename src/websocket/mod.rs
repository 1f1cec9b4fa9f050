//! WebSocket hub
//!
//! A single coordination loop owns the registry of live clients; each client
//! drains its own bounded outbound queue onto its connection.

mod client;
mod connection;
mod hub;
pub mod memory;
mod registry;
mod server;
mod session;

pub use client::{Client, ClientHandle, ClientId, ClientState, EnqueueOutcome};
pub use connection::{Connection, Envelope, FrameSink, FrameStream};
pub use hub::{Hub, HubLoop, HubStats};
pub use registry::{BroadcastReport, Registry};
pub use server::{TungsteniteConnection, WebSocketServer};
pub use session::{upgrade, ActixConnection, WsSession};
