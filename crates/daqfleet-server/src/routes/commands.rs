use axum::extract::State;
use axum::Json;
use daqfleet_core::transport::BatchResult;
use daqfleet_core::types::{Command, Target, Verb};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub verb: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Empty means the command's default hosts.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub unit: Option<u32>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandBody {
    fn to_command(&self) -> Result<Command, AppError> {
        let verb: Verb = self.verb.parse()?;
        let target: Target = match &self.target {
            Some(t) => t.parse()?,
            None => Target::None,
        };
        let mut command = Command::new(verb, target).with_args(self.args.clone());
        if let Some(unit) = self.unit {
            command = command.with_unit(unit);
        }
        // Surface verb/target mismatches as 400 before any host is contacted.
        command.line()?;
        Ok(command)
    }
}

/// POST /api/commands — ad-hoc command; returns one outcome per host.
pub async fn send_command(
    State(app): State<AppState>,
    Json(body): Json<CommandBody>,
) -> Result<Json<BatchResult>, AppError> {
    let command = body.to_command()?;
    let result = app.driver.command(&command, &body.hosts).await?;
    Ok(Json(result))
}
