use crate::output::{print_json, print_table};
use daqfleet_core::session::SessionOutcome;
use daqfleet_core::transport::BatchResult;
use daqfleet_core::types::{Command, Target, Verb};
use daqfleet_core::Controller;
use std::path::Path;
use std::sync::Arc;

pub struct CommandArgs {
    pub verb: String,
    pub target: String,
    pub hosts: Vec<String>,
    pub unit: Option<u32>,
    pub args: Vec<String>,
}

impl CommandArgs {
    fn to_command(&self) -> anyhow::Result<Command> {
        let verb: Verb = self.verb.parse()?;
        let target: Target = self.target.parse()?;
        let mut command = Command::new(verb, target).with_args(self.args.clone());
        if let Some(unit) = self.unit {
            command = command.with_unit(unit);
        }
        command.line()?;
        Ok(command)
    }
}

pub fn run(path: &Path, args: CommandArgs, json: bool) -> anyhow::Result<()> {
    // Reject malformed commands before touching the topology or network.
    let command = args.to_command()?;
    let topology = super::load_topology(path)?;
    let controller = Controller::with_defaults(Arc::new(topology));

    let result = super::runtime()?.block_on(controller.command(&command, &args.hosts))?;

    if json {
        print_json(&result)?;
    } else {
        print_table(&["HOST", "OUTCOME", "DETAIL"], rows(&result));
    }

    let failed = result.len() - result.count_ok();
    if failed > 0 {
        anyhow::bail!("'{}' failed on {failed} of {} host(s)", result.line, result.len());
    }
    Ok(())
}

fn rows(result: &BatchResult) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for entry in &result.outcomes {
        let detail: Vec<String> = match &entry.outcome {
            SessionOutcome::ConnectFailed { reason } => vec![reason.clone()],
            other => other.lines().to_vec(),
        };
        let label = entry.outcome.label().to_string();
        if detail.is_empty() {
            rows.push(vec![entry.host.clone(), label, String::new()]);
            continue;
        }
        // Multi-line responses continue on blank-host rows.
        for (i, line) in detail.into_iter().enumerate() {
            if i == 0 {
                rows.push(vec![entry.host.clone(), label.clone(), line]);
            } else {
                rows.push(vec![String::new(), String::new(), line]);
            }
        }
    }
    rows
}
