mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod ws;

use axum::http::HeaderValue;
use config::Config;
use docs::ApiDoc;
use routes::create_routes;
use services::{memory_store::MemoryRoomStore, room_service::{CachedRoomStore, RoomStore}};
use state::AppState;
use std::panic;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "syncpad_server=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let store = open_store(&config).await;
    let state = AppState::new(config.clone(), store);

    let app_routes = create_routes(state.clone())
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws/{{room_id}}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Nothing unsaved may be lost on the way out.
    let flushed = state.scheduler.flush_all(state.on_save()).await;
    info!("Shutdown complete, {} rooms flushed", flushed);
}

/// Postgres behind the room cache, or the memory store when no database is reachable.
async fn open_store(config: &Config) -> Arc<dyn RoomStore> {
    let backing: Arc<dyn RoomStore> = match &config.db_url {
        Some(db_url) => match db::dbrooms::init_db(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                db as Arc<dyn RoomStore>
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to in-memory room storage, rooms will not survive a restart");
                Arc::new(MemoryRoomStore::new())
            }
        },
        None => {
            warn!("No database URL configured - using in-memory room storage");
            Arc::new(MemoryRoomStore::new())
        }
    };
    Arc::new(CachedRoomStore::new(backing, config.room_cache_ttl()))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        if !config.is_development() {
            warn!("No CORS origins configured, allowing any origin");
        }
        return CorsLayer::permissive();
    }

    info!("CORS restricted to {} origins", origins.len());
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
