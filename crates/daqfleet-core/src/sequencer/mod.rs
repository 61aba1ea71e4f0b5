//! Staged start/stop state machine.
//!
//! The [`Sequencer`] performs no I/O. Callers feed it status snapshots via
//! [`Sequencer::observe`] and execute the [`StageAction`]s it hands back;
//! the [`crate::driver::Driver`] does both on a timer.
//!
//! Each stage waits for its readiness predicate. A stage that is not ready
//! spends one unit of retry budget per observation and advances degraded
//! once the budget is gone, so a run of N stages with budget B finishes
//! within N × B observations.
//!
//! A run's first-stage actions are handed to the caller by
//! [`Sequencer::begin_run`]. Until the caller reports them issued with
//! [`Sequencer::actions_issued`], observations leave the run untouched, so
//! a snapshot taken before those commands went out cannot advance it.

pub mod plan;
pub mod run;

pub use plan::{plan_for, start_plan, stop_plan, Expectation, Plan, Stage, StageAction};
pub use run::{RunHandle, RunOutcome, RunPhase, RunState, StageReport, StageResult};

use crate::status::StatusDocument;
use crate::topology::{PollConfig, Topology};
use crate::types::Direction;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Finished and superseded runs kept for `run_state` lookups.
const HISTORY_LIMIT: usize = 32;

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// Poll interval selection: fast for a bounded window of ticks, slow otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    fast: Duration,
    slow: Duration,
    window: u32,
    remaining: u32,
}

impl Cadence {
    pub fn new(fast: Duration, slow: Duration, window: u32) -> Self {
        Self {
            fast,
            slow,
            window,
            remaining: 0,
        }
    }

    pub fn from_config(cfg: &PollConfig) -> Self {
        Self::new(cfg.fast_interval(), cfg.slow_interval(), cfg.fast_window_ticks)
    }

    /// Start (or restart) the fast window.
    pub fn arm(&mut self) {
        self.remaining = self.window;
    }

    pub fn clear(&mut self) {
        self.remaining = 0;
    }

    /// Consume one tick of the fast window.
    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn is_fast(&self) -> bool {
        self.remaining > 0
    }

    pub fn interval(&self) -> Duration {
        if self.is_fast() {
            self.fast
        } else {
            self.slow
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// What one observation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// No active run.
    Idle,
    /// Current stage not ready yet, or its first actions not yet issued.
    Waiting {
        run_id: Uuid,
        stage: usize,
        retries_remaining: u32,
    },
    /// Moved to a new stage whose actions must now be issued.
    Advanced {
        run_id: Uuid,
        stage: usize,
        label: String,
        actions: Vec<StageAction>,
    },
    /// The last stage finished.
    Completed(RunOutcome),
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer {
    start: Plan,
    stop: Plan,
    budget: u32,
    cadence: Cadence,
    active: Option<RunState>,
    /// Run whose first-stage actions have not been issued yet.
    unissued: Option<Uuid>,
    history: VecDeque<RunState>,
}

impl Sequencer {
    pub fn new(start: Plan, stop: Plan, budget: u32, cadence: Cadence) -> Self {
        Self {
            start,
            stop,
            budget,
            cadence,
            active: None,
            unissued: None,
            history: VecDeque::new(),
        }
    }

    pub fn from_topology(topology: &Topology) -> Self {
        Self::new(
            start_plan(topology),
            stop_plan(topology),
            topology.poll.stage_retry_budget,
            Cadence::from_config(&topology.poll),
        )
    }

    pub fn plan(&self, direction: Direction) -> &Plan {
        match direction {
            Direction::Start => &self.start,
            Direction::Stop => &self.stop,
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn interval(&self) -> Duration {
        self.cadence.interval()
    }

    /// Switch to fast polling without starting a run.
    pub fn boost(&mut self) {
        self.cadence.arm();
    }

    /// Start a run, superseding any active one. Returns the first stage's
    /// actions.
    pub fn begin_run(&mut self, direction: Direction) -> (RunHandle, Vec<StageAction>) {
        if let Some(mut old) = self.active.take() {
            info!(run_id = %old.run_id, direction = %old.direction, "run superseded");
            old.finish(RunPhase::Superseded);
            self.archive(old);
        }

        let plan = self.plan(direction);
        let first = plan.stages.first();
        let label = first.map(|s| s.label.as_str()).unwrap_or_default();
        let actions = first.map(|s| s.actions.clone()).unwrap_or_default();
        let run = RunState::new(direction, plan.len(), label, self.budget);
        let handle = run.handle();

        info!(run_id = %run.run_id, %direction, stages = run.stage_count, "run started");
        self.unissued = (!actions.is_empty()).then_some(handle.run_id);
        self.active = Some(run);
        self.cadence.arm();
        (handle, actions)
    }

    /// Mark the first-stage actions of `run_id` as sent.
    pub fn actions_issued(&mut self, run_id: Uuid) {
        if self.unissued == Some(run_id) {
            self.unissued = None;
        }
    }

    /// Evaluate the current stage against a fresh snapshot.
    pub fn observe(&mut self, doc: &StatusDocument) -> Step {
        self.cadence.tick();
        let Some(run) = self.active.as_mut() else {
            return Step::Idle;
        };
        if self.unissued == Some(run.run_id) {
            return Step::Waiting {
                run_id: run.run_id,
                stage: run.stage,
                retries_remaining: run.retries_remaining,
            };
        }

        let plan = match run.direction {
            Direction::Start => &self.start,
            Direction::Stop => &self.stop,
        };
        let target = run.direction.target_readiness();

        let result = match plan.stages.get(run.stage) {
            None => None,
            Some(stage) if stage.is_ready(doc, target) => Some(StageResult::Ready),
            Some(stage) => {
                run.retries_remaining = run.retries_remaining.saturating_sub(1);
                if run.retries_remaining > 0 {
                    return Step::Waiting {
                        run_id: run.run_id,
                        stage: run.stage,
                        retries_remaining: run.retries_remaining,
                    };
                }
                warn!(
                    run_id = %run.run_id,
                    stage = %stage.label,
                    "stage retry budget exhausted, continuing degraded"
                );
                Some(StageResult::Exhausted)
            }
        };
        if let Some(result) = result {
            run.record_stage(result);
        }

        run.stage += 1;
        match plan.stages.get(run.stage) {
            Some(next) => {
                run.stage_label = next.label.clone();
                run.retries_remaining = self.budget;
                info!(run_id = %run.run_id, stage = run.stage, label = %next.label, "stage advanced");
                let step = Step::Advanced {
                    run_id: run.run_id,
                    stage: run.stage,
                    label: next.label.clone(),
                    actions: next.actions.clone(),
                };
                self.cadence.arm();
                step
            }
            None => {
                run.stage = plan.len();
                run.retries_remaining = 0;
                run.finish(RunPhase::Completed);
                let outcome = run.outcome();
                info!(
                    run_id = %outcome.run_id,
                    clean = outcome.is_clean(),
                    "run completed"
                );
                if let Some(done) = self.active.take() {
                    self.archive(done);
                }
                self.cadence.clear();
                Step::Completed(outcome)
            }
        }
    }

    pub fn current(&self) -> Option<&RunState> {
        self.active.as_ref()
    }

    pub fn run_state(&self, handle: RunHandle) -> Option<RunState> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|r| r.run_id == handle.run_id)
            .cloned()
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.active.as_ref().is_some_and(|r| r.run_id == run_id)
    }

    /// Attach dispatch failures to a run. Returns false (and drops the
    /// messages) when the run is no longer active.
    pub fn record_dispatch(&mut self, run_id: Uuid, failures: Vec<String>) -> bool {
        match self.active.as_mut() {
            Some(run) if run.run_id == run_id => {
                run.messages.extend(failures);
                true
            }
            _ => false,
        }
    }

    fn archive(&mut self, run: RunState) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(run);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
