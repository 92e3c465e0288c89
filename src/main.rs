//! # Room Signal Backend - Main Application Entry Point
//!
//! Actix-web server combining the signaling WebSocket, the audio ingestion
//! WebSocket, and the REST API for SFU negotiation, transcript history,
//! configuration, and health.
//!
//! ## Application Architecture:
//! - **config**: TOML + environment configuration
//! - **state**: Shared application state and request metrics
//! - **rooms**: Peer/room membership registry
//! - **signaling**: WebSocket membership coordinator
//! - **audio**: PCM ingestion and speech segmentation
//! - **transcription**: Session lifecycle, AI gateway
//! - **sfu**: SFU negotiation client
//! - **storage**: Session/transcript persistence
//! - **handlers**: REST request handlers
//! - **middleware**: Request logging and metrics collection

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod rooms;
mod sfu;
mod signaling;
mod state;
mod storage;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use rooms::Registry;
use sfu::SfuClient;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use storage::{MemoryStore, TranscriptStore};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{AiGateway, HttpAiGateway, TranscriptionManager};

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting room-signal-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    // Wire the gateways and the transcription pipeline, then hand everything
    // to the shared state. The store and AI gateway are trait objects so
    // tests (and future backends) can swap them.
    let store: Arc<dyn TranscriptStore> = Arc::new(MemoryStore::new());
    let ai: Arc<dyn AiGateway> = Arc::new(HttpAiGateway::new(&config.ai));
    let sfu = Arc::new(SfuClient::new(
        &config.sfu.base_url,
        &config.sfu.app_id,
        &config.sfu.app_token,
    ));
    let registry = Arc::new(RwLock::new(Registry::new()));
    let transcription = Arc::new(TranscriptionManager::new(
        &config.audio,
        Arc::clone(&ai),
        Arc::clone(&store),
    ));

    let app_state = AppState::new(
        config.clone(),
        registry,
        transcription,
        ai,
        store,
        sfu,
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

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
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsCollector)
            .wrap(middleware::RequestTrace)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::config::get_config))
                    .route("/config", web::put().to(handlers::config::update_config))
                    .route(
                        "/calls/sessions/new",
                        web::post().to(handlers::calls::new_session),
                    )
                    .route(
                        "/calls/sessions/{session_id}/tracks/new",
                        web::post().to(handlers::calls::push_tracks),
                    )
                    .route(
                        "/calls/sessions/{session_id}/tracks/pull",
                        web::post().to(handlers::calls::pull_tracks),
                    )
                    .route(
                        "/calls/sessions/{session_id}/renegotiate",
                        web::put().to(handlers::calls::renegotiate),
                    )
                    .route(
                        "/rooms/{room_id}/transcripts",
                        web::get().to(handlers::transcripts::room_transcripts),
                    )
                    .route(
                        "/sessions/{session_id}",
                        web::get().to(handlers::transcripts::get_session),
                    )
                    .route(
                        "/assistant/query",
                        web::post().to(handlers::transcripts::assistant_query),
                    ),
            )
            // Health check at root level for load balancers.
            .route("/health", web::get().to(health::health_check))
            .route("/ws/signal", web::get().to(signaling::signal_ws))
            .route("/ws/audio", web::get().to(audio::ingest::audio_ws))
    })
    .bind(&bind_addr)?
    .run();

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

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_signal_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// SIGTERM/SIGINT both set the shutdown flag; the main select loop picks it
/// up and stops the server gracefully.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
