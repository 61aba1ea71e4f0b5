//! Orchestration run bookkeeping.
//!
//! A run walks a plan's stages in order. Each stage either becomes ready
//! or exhausts its retry budget; both advance the run, so a run always
//! reaches `Completed` unless a newer run supersedes it first.

use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to a run returned by `begin_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: Uuid,
}

// ---------------------------------------------------------------------------
// RunPhase
// ---------------------------------------------------------------------------

/// Lifecycle of a run.
///
/// Transitions: `Active → Completed | Superseded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Active,
    Completed,
    /// Replaced by a newer `begin_run` before finishing.
    Superseded,
}

// ---------------------------------------------------------------------------
// StageReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResult {
    Ready,
    /// Retry budget ran out before readiness; the run moved on degraded.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub label: String,
    pub result: StageResult,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub direction: Direction,
    /// Labels of stages that advanced on budget exhaustion.
    pub exhausted: Vec<String>,
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        self.exhausted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Snapshot of a run as seen by presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub direction: Direction,
    /// Index of the current stage; equals `stage_count` once completed.
    pub stage: usize,
    pub stage_count: usize,
    pub stage_label: String,
    pub retries_remaining: u32,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<StageReport>,
    /// `host: message` lines from dispatches issued on behalf of this run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl RunState {
    pub(crate) fn new(direction: Direction, stage_count: usize, first_label: &str, budget: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            direction,
            stage: 0,
            stage_count,
            stage_label: first_label.to_string(),
            retries_remaining: budget,
            phase: RunPhase::Active,
            started_at: Utc::now(),
            finished_at: None,
            history: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            run_id: self.run_id,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == RunPhase::Active
    }

    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            direction: self.direction,
            exhausted: self
                .history
                .iter()
                .filter(|r| r.result == StageResult::Exhausted)
                .map(|r| r.label.clone())
                .collect(),
        }
    }

    pub(crate) fn record_stage(&mut self, result: StageResult) {
        self.history.push(StageReport {
            label: self.stage_label.clone(),
            result,
            finished_at: Utc::now(),
        });
    }

    pub(crate) fn finish(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
    }
}
