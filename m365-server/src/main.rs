//! M365 Dashboard Server
//!
//! Serves the dashboard UI and its REST/SSE API

use anyhow::Result;
use clap::Parser;
use m365_server::config::DashboardArgs;
use m365_server::{api, logging, shutdown, state};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let args = DashboardArgs::parse();

    info!("Starting M365 dashboard");

    // Create application state
    let state = state::AppState::new(args.settings());

    // Build the router
    let app = api::create_router(state.clone());

    info!("Server listening on http://{}", args.bind);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    state.session.lock().await.stop_live();
    info!("Dashboard stopped");
    Ok(())
}
