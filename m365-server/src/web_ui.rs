//! Embedded dashboard UI

use axum::response::Html;

/// Serve the single-page dashboard
pub async fn serve_ui() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}
