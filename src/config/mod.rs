use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
    /// A level or a full filter directive such as `relay_hub=debug,info`
    pub log_level: String,
}

impl ServerConfig {
    /// Filter built from `log_level`, falling back to `info` when it does not parse.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    /// Outbound frames buffered per client before it is treated as too slow
    pub queue_capacity: usize,
    pub write_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// Re-broadcast frames received from a client to every other client
    pub relay_inbound: bool,
    pub allow_http_broadcast: bool,
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            write_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            relay_inbound: false,
            allow_http_broadcast: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_any_origin: bool,
    pub max_age: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub cors: CorsConfig,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
    environment: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("environment", environment)?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", num_cpus::get() as i64)?
        .set_default("server.log_level", "info")?
        .set_default("hub.queue_capacity", 64)?
        .set_default("hub.write_timeout_ms", 5_000)?
        .set_default("hub.heartbeat_interval_secs", 30)?
        .set_default("hub.relay_inbound", false)?
        .set_default("hub.allow_http_broadcast", false)?
        .set_default("cors.enabled", true)?
        // The websocket upgrader accepts every origin
        .set_default("cors.allow_any_origin", true)?
        .set_default("cors.max_age", 3600)
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings: Settings = with_defaults(Config::builder(), "development")?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))

            // Add in settings from environment variables (with prefix "APP_")
            // E.g., `APP_HUB__QUEUE_CAPACITY=128` would set `Settings.hub.queue_capacity`
            .add_source(
                Environment::with_prefix("app")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn new_for_test() -> Result<Self, ConfigError> {
        let settings: Settings = with_defaults(Config::builder(), "test")?
            .set_override("server.workers", 1)?
            .set_override("hub.write_timeout_ms", 1_000)?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::Message("hub.queue_capacity must be greater than zero".into()));
        }
        if self.hub.write_timeout_ms == 0 {
            return Err(ConfigError::Message("hub.write_timeout_ms must be greater than zero".into()));
        }
        if self.hub.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Message("hub.heartbeat_interval_secs must be greater than zero".into()));
        }
        Ok(())
    }
}
