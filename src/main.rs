use axum::Router;
use coderoom::services::room_store::RoomStore;
use coderoom::{config, db, handlers, routes, AppState};
use std::panic;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

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
            // Default to info level, but allow debug for our app
            "coderoom=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let app_config = config::Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        config::Config::default()
    });

    // Initialize global configuration
    if config::init_config(app_config).is_err() {
        error!("Failed to initialize global configuration");
        return;
    }
    let cfg = config::get_config();

    // Room records go to Postgres when configured, otherwise in-memory
    let store = if let Some(db_url) = &cfg.db_url {
        match db::dbrooms::init_db(db_url).await {
            Ok(_) => {
                info!("Database initialized successfully");
                RoomStore::postgres(db::dbrooms::get_db().expect("database just initialized"))
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to in-memory room store");
                RoomStore::in_memory()
            }
        }
    } else {
        warn!("No database URL configured - room records are in-memory only");
        RoomStore::in_memory()
    };

    let state = AppState::new(store);

    // Combine all routes
    let app_routes = Router::new()
        .route("/health", axum::routing::get(handlers::health_check))
        .route("/ready", axum::routing::get(handlers::ready_check))
        .merge(routes::create_api_routes(state))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cfg.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", cfg.server_address()));

    info!("Server running on http://{}", cfg.server_address());
    info!("Event channel available at ws://{}/ws", cfg.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
