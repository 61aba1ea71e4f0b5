use crate::output::print_json;
use daqfleet_core::sequencer::{RunState, StageResult, Step};
use daqfleet_core::types::Direction;
use daqfleet_core::Driver;
use std::path::Path;

/// Drive one start or stop run to completion in the foreground, printing
/// each stage as it begins and finishes.
pub fn run(path: &Path, direction: Direction, json: bool) -> anyhow::Result<()> {
    let topology = super::load_topology(path)?;
    let driver = Driver::from_topology(topology);

    let state = super::runtime()?.block_on(async {
        tokio::select! {
            state = drive(&driver, direction, json) => state,
            _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
        }
    })?;

    if json {
        return print_json(&state);
    }

    let exhausted: Vec<&str> = state
        .history
        .iter()
        .filter(|r| r.result == StageResult::Exhausted)
        .map(|r| r.label.as_str())
        .collect();
    if exhausted.is_empty() {
        println!("{direction} run complete");
    } else {
        println!(
            "{direction} run complete (degraded: {} did not become ready)",
            exhausted.join("; ")
        );
    }
    Ok(())
}

async fn drive(driver: &Driver, direction: Direction, quiet: bool) -> anyhow::Result<RunState> {
    let handle = driver.begin_run(direction);
    let mut progress = Progress::default();
    if !quiet {
        progress.report(&driver.run_state(handle)?);
    }

    loop {
        let step = driver.tick().await;
        let state = driver.run_state(handle)?;
        if !quiet {
            progress.report(&state);
        }
        if let Step::Completed(_) = step {
            return Ok(state);
        }
        if !state.is_active() {
            anyhow::bail!("run {} was superseded", state.run_id);
        }
        tokio::time::sleep(driver.interval()).await;
    }
}

/// Tracks what has already been printed for a run.
#[derive(Default)]
struct Progress {
    started: Option<usize>,
    finished: usize,
    messages: usize,
}

impl Progress {
    fn report(&mut self, state: &RunState) {
        for report in &state.history[self.finished..] {
            let result = match report.result {
                StageResult::Ready => "ready",
                StageResult::Exhausted => "not ready, continuing",
            };
            println!("  {}: {result}", report.label);
        }
        self.finished = state.history.len();

        for message in &state.messages[self.messages..] {
            println!("  ! {message}");
        }
        self.messages = state.messages.len();

        if state.is_active() && self.started != Some(state.stage) {
            println!(
                "[{}/{}] {}",
                state.stage + 1,
                state.stage_count,
                state.stage_label
            );
            self.started = Some(state.stage);
        }
    }
}
