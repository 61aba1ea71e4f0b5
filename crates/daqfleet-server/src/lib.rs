pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use daqfleet_core::{Driver, Topology};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
///
/// The router only reads from and writes to `driver`; polling is started
/// separately by `serve` / `serve_on`.
pub fn build_router(driver: Arc<Driver>) -> Router {
    let app_state = state::AppState::new(driver);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Status
        .route("/api/status", get(routes::status::get_status))
        // Runs
        .route("/api/runs", post(routes::runs::begin_run))
        .route("/api/runs/current", get(routes::runs::current_run))
        .route("/api/runs/{id}", get(routes::runs::get_run))
        // Ad-hoc commands
        .route("/api/commands", post(routes::commands::send_command))
        // Topology
        .route("/api/topology", get(routes::topology::get_topology))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the status loop and the HTTP API for `topology`.
pub async fn serve(topology: Topology, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(Arc::new(Driver::from_topology(topology)), listener).await
}

/// Start the status loop and the HTTP API on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port). Both stop on Ctrl-C.
pub async fn serve_on(
    driver: Arc<Driver>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(driver.clone());

    let poller = tokio::spawn({
        let driver = driver.clone();
        async move { driver.run(shutdown_signal()).await }
    });

    tracing::info!(
        fleet = %driver.topology().name,
        hosts = driver.topology().hosts.len(),
        "daqfleet API listening on http://localhost:{actual_port}"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    poller.abort();
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the task is dropped.
        std::future::pending::<()>().await;
    }
}
