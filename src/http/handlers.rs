use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::websocket::{self, ClientId, Envelope};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeResponse {
    pub message: String,
    pub status: bool,
}

pub async fn home() -> HttpResponse {
    HttpResponse::Ok().json(HomeResponse {
        message: "Welcome to new server".to_string(),
        status: true,
    })
}

/// Health check endpoint handler
/// Returns server status, timestamp and the hub's counters
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = state.hub.stats().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "hub": stats,
    })))
}

/// Upgrades the HTTP connection to a WebSocket connection owned by the hub
pub async fn websocket_route(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    match websocket::upgrade(&req, stream, &state.hub) {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!("Rejected WebSocket request from {:?}: {}", req.peer_addr(), e);
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub exclude: Option<ClientId>,
}

pub async fn broadcast(
    req: web::Json<BroadcastRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if !state.config.hub.allow_http_broadcast {
        return Err(AppError::Forbidden("HTTP broadcast is disabled".into()));
    }

    let req = req.into_inner();
    if req.kind.trim().is_empty() {
        return Err(AppError::ValidationError("type must not be empty".into()));
    }

    info!("Broadcasting '{}' message", req.kind);
    let envelope = Envelope::new(req.kind, req.payload);
    if let Err(e) = state.hub.broadcast(&envelope, req.exclude) {
        error!("Broadcast failed: {}", e);
        return Err(e.into());
    }

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "status": "queued"
    })))
}
