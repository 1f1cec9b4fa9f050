//! HTTP surface of the hub: the upgrade endpoint plus a few JSON routes.

pub mod handlers;

use actix_web::web;

pub use handlers::{broadcast, health_check, home, websocket_route};

// List of endpoints
pub const HOME: &str = "/";
pub const HEALTH: &str = "/health";
pub const WEB_SOCKET: &str = "/web-socket";
pub const BROADCAST: &str = "/broadcast";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(HOME, web::get().to(home))
        .route(HEALTH, web::get().to(health_check))
        .route(WEB_SOCKET, web::get().to(websocket_route))
        .route(BROADCAST, web::post().to(broadcast));
}
