pub mod config;
pub mod error;
pub mod http;
pub mod websocket;

use std::sync::Arc;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;
pub use http::health_check;

pub use websocket::{ClientId, Envelope, Hub, HubLoop, HubStats};

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub hub: Hub,
}

impl AppState {
    /// The returned loop must be spawned before the hub is used.
    pub fn new(config: Settings) -> (Self, HubLoop) {
        let (hub, hub_loop) = Hub::new(config.hub.clone());
        let state = Self {
            config: Arc::new(config),
            hub,
        };
        (state, hub_loop)
    }

    pub fn shutdown(&self) {
        // Releases every client queue; write loops then close their connections
        self.hub.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_state_creation() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let (state, hub_loop) = AppState::new(config);
        tokio::spawn(hub_loop.run());

        let stats = state.hub.stats().await.unwrap();
        assert_eq!(stats, HubStats::default());
    }

    #[tokio::test]
    async fn test_app_state_clone() {
        let config = Settings::new_for_test().expect("Failed to load test config");
        let (state, hub_loop) = AppState::new(config);
        let handle = tokio::spawn(hub_loop.run());

        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.config, &cloned.config));

        // Both clones talk to the same loop
        cloned.shutdown();
        handle.await.unwrap();
        assert!(state.hub.is_closed());
    }
}
