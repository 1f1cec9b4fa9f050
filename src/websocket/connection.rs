use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use crate::error::WebSocketError;

/// Writing half of an established duplex connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, frame: Bytes) -> Result<(), WebSocketError>;

    async fn close(&mut self) -> Result<(), WebSocketError>;
}

/// Reading half of an established duplex connection.
///
/// `None` means the peer closed the connection cleanly.
#[async_trait]
pub trait FrameStream: Send + 'static {
    async fn receive(&mut self) -> Option<Result<Bytes, WebSocketError>>;
}

/// A connection handed over by an upgrade adapter.
pub trait Connection: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    /// Human readable peer description, only used for logging
    fn peer(&self) -> String;

    fn split(self) -> (Self::Sink, Self::Stream);
}

/// Message wrapper delivered to every client.
///
/// The hub never looks at `kind`, it only serializes the envelope once per
/// broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(kind: impl Into<String>, payload: T) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}
