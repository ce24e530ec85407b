use anyhow::Result;
use std::time::Duration;

use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::job_routes::job_routes;
use super::metrics::{metrics_handler, set_catalog_counts};
use super::{log_requests, state::*};

#[derive(Serialize)]
struct CatalogCounts {
    pub bands: usize,
    pub albums: usize,
    pub tracks: usize,
    pub upcoming_releases: usize,
}

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
    pub catalog: CatalogCounts,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let store = &state.catalog_store;
    let catalog = CatalogCounts {
        bands: store.get_bands_count(),
        albums: store.get_albums_count(),
        tracks: store.get_tracks_count(),
        upcoming_releases: store.get_upcoming_count(),
    };
    set_catalog_counts(
        catalog.bands,
        catalog.albums,
        catalog.tracks,
        catalog.upcoming_releases,
    );

    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        catalog,
    };
    Json(stats)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", job_routes())
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the token is cancelled.
pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Admin server listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;
    Ok(())
}
