use std::time::{Duration, Instant};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::connection::{Connection, FrameSink, FrameStream};
use super::hub::Hub;
use crate::error::WebSocketError;

type Inbound = Result<Bytes, WebSocketError>;

/// Actor owning one upgraded actix websocket.
///
/// It only moves frames: outbound frames arrive as [`Outbound`] messages,
/// inbound frames are forwarded to the hub-side [`ActixStream`].
pub struct WsSession {
    peer: String,
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
}

impl WsSession {
    fn new(peer: String, heartbeat_interval: Duration) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            peer,
            inbound: Some(tx),
            heartbeat_interval,
            last_heartbeat: Instant::now(),
        };
        (session, rx)
    }

    fn forward(&self, frame: Inbound) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(frame);
        }
    }

    fn start_heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.heartbeat_interval * 2 {
                warn!("Heartbeat timeout for {}", act.peer);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection established with {}", self.peer);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection closed with {}", self.peer);
        // Ends the hub-side stream
        self.inbound.take();
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Outbound(pub Bytes);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect;

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        let frame = msg.0;
        match String::from_utf8(frame.to_vec()) {
            Ok(text) => ctx.text(text),
            Err(_) => ctx.binary(frame),
        }
    }
}

impl Handler<Disconnect> for WsSession {
    type Result = ();

    fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.forward(Ok(Bytes::copy_from_slice(text.as_bytes())));
            }
            Ok(ws::Message::Binary(bin)) => {
                self.forward(Ok(bin));
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed from {}: {:?}", self.peer, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {
                debug!("Ignoring control frame from {}", self.peer);
            }
            Err(e) => {
                error!("Error handling WebSocket message from {}: {}", self.peer, e);
                self.forward(Err(WebSocketError::ConnectionError(e.to_string())));
                ctx.stop();
            }
        }
    }
}

pub struct ActixConnection {
    addr: Addr<WsSession>,
    peer: String,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

pub struct ActixSink {
    addr: Addr<WsSession>,
}

pub struct ActixStream {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Connection for ActixConnection {
    type Sink = ActixSink;
    type Stream = ActixStream;

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn split(self) -> (ActixSink, ActixStream) {
        (ActixSink { addr: self.addr }, ActixStream { inbound: self.inbound })
    }
}

#[async_trait]
impl FrameSink for ActixSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), WebSocketError> {
        self.addr
            .send(Outbound(frame))
            .await
            .map_err(|e| WebSocketError::SendError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), WebSocketError> {
        // A stopped session silently drops the message
        self.addr.do_send(Disconnect);
        Ok(())
    }
}

#[async_trait]
impl FrameStream for ActixStream {
    async fn receive(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }
}

/// Upgrades `req` and registers the resulting connection with the hub.
///
/// Requests that are not a valid websocket handshake fail with
/// [`WebSocketError::UpgradeFailed`] before anything is registered.
pub fn upgrade(
    req: &HttpRequest,
    stream: web::Payload,
    hub: &Hub,
) -> Result<HttpResponse, WebSocketError> {
    ws::handshake(req).map_err(|e| WebSocketError::UpgradeFailed(e.to_string()))?;

    let peer = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let (session, inbound) = WsSession::new(peer.clone(), hub.config().heartbeat_interval());

    let (addr, response) = ws::WsResponseBuilder::new(session, req, stream)
        .start_with_addr()
        .map_err(|e| WebSocketError::UpgradeFailed(e.to_string()))?;

    hub.connect(ActixConnection { addr, peer, inbound })?;
    Ok(response)
}
