//! # Music Vault Backend - Main Application Entry Point
//!
//! An Actix-web server that accepts audio uploads, converts them to MP3 when
//! needed, and serves them back.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **library**: The music directory and every filesystem operation on it
//! - **pipeline**: Upload validation, storage naming, and transcoding
//! - **handlers**: Upload, listing, streaming and download endpoints
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **keepalive**: Optional self-ping loop
//! - **error**: Custom error types and HTTP error responses
//!
//! ## Startup order:
//! 1. Load and validate configuration
//! 2. Create the music directory (once, before any request is accepted)
//! 3. Build the transcoder and shared state
//! 4. Bind the HTTP server

mod config;
mod error;
mod handlers;
mod health;
mod keepalive;
mod library;
mod middleware;
mod pipeline;
mod state;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use library::MusicLibrary;
use pipeline::FfmpegTranscoder;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting music-vault-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let library = MusicLibrary::init(&config.storage.music_dir, &config.media.canonical_extension)
        .await
        .with_context(|| {
            format!(
                "Failed to prepare music directory {}",
                config.storage.music_dir.display()
            )
        })?;

    let transcoder = Arc::new(FfmpegTranscoder::new(&config.transcoder));
    let app_state = AppState::new(config.clone(), library, transcoder);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    // Multipart payloads are streamed, this only caps non-multipart bodies.
    let payload_limit = usize::try_from(config.storage.max_upload_bytes).unwrap_or(usize::MAX);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::PayloadConfig::new(payload_limit))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/", web::get().to(handlers::index))
            .route("/upload", web::post().to(handlers::upload_file))
            .route("/music", web::get().to(handlers::list_music))
            .route("/music/{filename}", web::get().to(handlers::stream_music))
            .route("/download/{filename}", web::get().to(handlers::download_music))
            .default_service(web::route().to(handlers::public_asset))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    let keepalive_task = keepalive::spawn(&config.keepalive, config.keepalive_url());

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    if let Some(task) = keepalive_task {
        task.abort();
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "music_vault_backend=debug")
/// - If not set, defaults to "music_vault_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "music_vault_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and set the shutdown flag on the first one.
///
/// Graceful shutdown lets in-flight uploads (and their transcodes) finish
/// before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
