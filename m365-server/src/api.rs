//! REST API and SSE routes

use crate::config::DashboardSettings;
use crate::state::AppState;
use crate::view::DashboardView;
use crate::web_ui;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tower_http::cors::CorsLayer;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(web_ui::serve_ui))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/dashboard", get(dashboard))
        .route("/api/dashboard/stream", get(dashboard_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Settings Endpoints ===

async fn get_settings(State(state): State<AppState>) -> Json<DashboardSettings> {
    Json(state.settings().await)
}

/// Replace the settings; the response carries the clamped values
async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<DashboardSettings>,
) -> Json<DashboardSettings> {
    let applied = state.update_settings(settings).await;
    tracing::info!("Dashboard settings updated: source={:?}", applied.source);
    Json(applied)
}

// === Dashboard Endpoints ===

async fn dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.refresh().await)
}

/// One view per refresh period, the first immediately
async fn dashboard_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold((state, true), |(state, first)| async move {
        if !first {
            let period = state.settings().await.refresh_period();
            tokio::time::sleep(period).await;
        }

        let view = state.refresh().await;
        let event = Event::default()
            .event("view")
            .json_data(&view)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to serialize view: {}", e);
                Event::default().event("error").data(e.to_string())
            });

        Some((Ok(event), (state, false)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
