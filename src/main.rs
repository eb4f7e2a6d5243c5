//! Grain Analyzer Backend
//!
//! Estimates alloy yield strength from micrograph grain size, with SQLite
//! persistence and Tantivy full-text search over past analyses.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod grain;
mod models;
mod search;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Grain Analyzer Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        max_upload_bytes = config.max_upload_bytes,
        default_circles = config.default_circles,
        "Analysis limits"
    );

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (GRAIN_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    tracing::info!("Building search index...");
    let analyses = repo.list_analyses().await?;
    search.rebuild(&analyses).await?;

    let state = AppState {
        repo,
        search,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();
    let body_limit = state.config.max_upload_bytes;

    let api_routes = Router::new()
        // Datastore
        .route("/datastore", get(api::get_datastore))
        .route("/datastore/revision", get(api::get_revision))
        // Materials
        .route(
            "/materials",
            get(api::list_materials).post(api::create_material),
        )
        .route(
            "/materials/{id}",
            get(api::get_material)
                .put(api::update_material)
                .delete(api::delete_material),
        )
        // Calibration
        .route("/calibrate", post(api::calibrate))
        // Analyses
        .route(
            "/analyses",
            get(api::list_analyses).post(api::create_analysis),
        )
        .route(
            "/analyses/{id}",
            get(api::get_analysis).delete(api::delete_analysis),
        )
        .route("/analyses/{id}/report", get(api::get_report))
        .route("/analyses/{id}/overlay", get(api::get_overlay))
        // Search
        .route("/search", get(api::search_analyses))
        .layer(DefaultBodyLimit::max(body_limit))
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
