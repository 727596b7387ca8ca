//! Consent Management Platform core
//!
//! Boots the consent store from persisted cookies, fetches the vendor and
//! purpose catalogs, and serves the command API over HTTP.

mod api;
mod auth;
mod boot;
mod catalog;
mod cmp;
mod config;
mod cookie;
mod db;
mod errors;
mod models;
mod notify;
mod store;

use std::sync::{Arc, OnceLock};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boot::{BootContext, UiDecision};
use catalog::CatalogClient;
use cmp::CmpHandle;
use config::Config;
use db::SqliteCookieStorage;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub handle: CmpHandle,
    pub config: Arc<Config>,
    pub ui: Arc<OnceLock<UiDecision>>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            handle: CmpHandle::new(),
            config,
            ui: Arc::new(OnceLock::new()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CMP core");
    tracing::info!("Cookie database: {:?}", config.db_path);
    tracing::info!("Vendor list: {}", config.vendor_list_url);
    tracing::info!("Purpose list: {}", config.purpose_list_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (CMP_API_PSK). Authentication is disabled!");
    }

    // Initialize cookie storage
    let pool = db::init_database(&config.db_path).await?;
    let storage = Arc::new(SqliteCookieStorage::new(pool));

    let catalogs = CatalogClient::new(&config.vendor_list_url, &config.purpose_list_url)?;

    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config));

    // Boot in the background; commands arriving meanwhile are queued
    let ctx = BootContext {
        config: Arc::clone(&config),
        storage,
        catalogs,
        handle: state.handle.clone(),
        ui: Arc::clone(&state.ui),
    };
    tokio::spawn(async move {
        if let Ok(booted) = boot::boot(ctx).await {
            let store = booted.store.lock().await;
            tracing::info!(
                "CMP booted with {} vendors and {} purposes (show UI: {})",
                store.record().vendor_consent.len(),
                store.record().purpose_consent.len(),
                booted.ui.show_ui
            );
        }
    });

    let handle = state.handle.clone();
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.teardown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route("/cmp", post(api::run_command))
        .route("/status", get(api::get_status))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
