use axum::extract::{Query, State};
use axum::Json;
use daqfleet_core::StatusDocument;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    /// Collect a fresh snapshot instead of returning the last published one.
    #[serde(default)]
    pub refresh: bool,
}

/// GET /api/status — latest status document.
pub async fn get_status(
    State(app): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Json<StatusDocument> {
    let doc = if params.refresh {
        app.driver.refresh().await
    } else {
        app.driver.status_document()
    };
    Json(doc.as_ref().clone())
}
