use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{error, info};

use super::client::ClientId;
use super::connection::{Connection, FrameSink, FrameStream};
use super::hub::Hub;
use crate::error::WebSocketError;

/// A tokio-tungstenite stream viewed as a hub connection.
pub struct TungsteniteConnection<S> {
    stream: WebSocketStream<S>,
    peer: String,
}

pub struct TungsteniteSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

pub struct TungsteniteStream<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> TungsteniteConnection<S> {
    pub fn new(stream: WebSocketStream<S>, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
        }
    }
}

impl<S> Connection for TungsteniteConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sink = TungsteniteSink<S>;
    type Stream = TungsteniteStream<S>;

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn split(self) -> (Self::Sink, Self::Stream) {
        let (sink, stream) = self.stream.split();
        (TungsteniteSink { sink }, TungsteniteStream { stream })
    }
}

#[async_trait]
impl<S> FrameSink for TungsteniteSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Bytes) -> Result<(), WebSocketError> {
        // Serialized envelopes are JSON and go out as text frames
        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| WebSocketError::SendError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), WebSocketError> {
        self.sink
            .close()
            .await
            .map_err(|e| WebSocketError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl<S> FrameStream for TungsteniteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> Option<Result<Bytes, WebSocketError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(WebSocketError::ConnectionError(e.to_string()))),
            }
        }
    }
}

/// Accepts raw TCP connections, upgrades them and hands them to the hub.
pub struct WebSocketServer {
    hub: Hub,
}

impl WebSocketServer {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    pub async fn handle_connection(
        self: Arc<Self>,
        raw_stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<ClientId, WebSocketError> {
        info!("New WebSocket connection from: {}", addr);

        let ws_stream = match tokio_tungstenite::accept_async(raw_stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Error during WebSocket handshake with {}: {}", addr, e);
                return Err(WebSocketError::UpgradeFailed(e.to_string()));
            }
        };

        self.hub.connect(TungsteniteConnection::new(ws_stream, addr.to_string()))
    }

    /// Accept loop; returns only when the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                // Failures are already logged by handle_connection
                let _ = server.handle_connection(stream, addr).await;
            });
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}
