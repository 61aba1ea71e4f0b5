use axum::extract::{Path, State};
use axum::Json;
use daqfleet_core::sequencer::{RunHandle, RunState};
use daqfleet_core::types::Direction;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BeginRunBody {
    pub direction: String,
}

/// POST /api/runs — start a start or stop run, superseding any active run.
pub async fn begin_run(
    State(app): State<AppState>,
    Json(body): Json<BeginRunBody>,
) -> Result<Json<RunState>, AppError> {
    let direction: Direction = body.direction.parse()?;
    if let Some(active) = app.driver.current_run().filter(RunState::is_active) {
        info!(run_id = %active.run_id, "superseding active run");
    }
    let handle = app.driver.begin_run(direction);
    Ok(Json(app.driver.run_state(handle)?))
}

/// GET /api/runs/current — the active run, or `null` when no run is in progress.
/// Finished runs stay reachable through `GET /api/runs/{id}`.
pub async fn current_run(State(app): State<AppState>) -> Json<Option<RunState>> {
    Json(app.driver.current_run())
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(app): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunState>, AppError> {
    Ok(Json(app.driver.run_state(RunHandle { run_id })?))
}
