use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use dotenv::dotenv;
use relay_hub::{http, AppError, AppState, Settings};
use std::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[actix_web::main]
async fn main() -> relay_hub::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Settings::new()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.server.log_filter());
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
    info!("Configuration loaded successfully");

    let (state, hub_loop) = AppState::new(config.clone());
    let mut hub_task = tokio::spawn(hub_loop.run());
    let data = web::Data::new(state.clone());

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!(
        "Hub ready to accept connections at ws://{}:{}{}",
        config.server.host,
        config.server.port,
        http::WEB_SOCKET
    );

    let cors_config = config.cors.clone();
    let server = HttpServer::new(move || {
        let cors = if !cors_config.enabled {
            Cors::default()
        } else if cors_config.allow_any_origin {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(cors_config.max_age as usize)
        } else {
            Cors::default()
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec!["Authorization", "Content-Type"])
                .max_age(cors_config.max_age as usize)
        };

        App::new()
            .wrap(cors)
            .app_data(data.clone())
            .configure(http::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run();
    let server_handle = server.handle();

    tokio::select! {
        result = server => {
            result?;
            info!("HTTP server stopped, shutting down hub");
            state.shutdown();
            if let Err(e) = hub_task.await {
                error!("Hub coordination loop failed during shutdown: {}", e);
            }
            Ok(())
        }
        joined = &mut hub_task => {
            // The hub never stops on its own; without it no client can be served
            match joined {
                Ok(()) => error!("Hub coordination loop exited unexpectedly"),
                Err(e) => error!("Hub coordination loop failed: {}", e),
            }
            server_handle.stop(true).await;
            Err(AppError::InternalError("hub coordination loop stopped".into()))
        }
    }
}
