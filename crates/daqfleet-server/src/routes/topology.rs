use axum::extract::State;
use axum::Json;
use daqfleet_core::Topology;

use crate::state::AppState;

/// GET /api/topology
pub async fn get_topology(State(app): State<AppState>) -> Json<Topology> {
    Json(app.driver.topology().clone())
}
