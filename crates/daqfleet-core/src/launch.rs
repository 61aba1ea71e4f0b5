//! Remote launch of daemons that cannot be started through an agent.
//!
//! Master control cannot start itself, and persistent server daemons live
//! outside the agent protocol. Both are started by running a configured
//! argv template, typically an `ssh` invocation.

use crate::error::{DaqError, Result};
use crate::session::SessionOutcome;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Substitute `{host}` and `{daemon}` in every argv element.
pub fn render(template: &[String], host: &str, daemon: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{host}", host).replace("{daemon}", daemon))
        .collect()
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run `argv` to completion. `Ok` with exit status 0, `Fail` otherwise;
    /// the output lines are carried either way.
    async fn launch(&self, argv: &[String]) -> Result<SessionOutcome>;
}

/// Runs the argv as a local child process via `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    timeout: Duration,
}

impl CommandLauncher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, argv: &[String]) -> Result<SessionOutcome> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| DaqError::Launch("empty launch command".into()))?;

        debug!(program, ?args, "launching");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaqError::Launch(format!("failed to spawn '{program}': {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(program, timeout = ?self.timeout, "launch command timed out");
                return Ok(SessionOutcome::ProtocolTimeout(Vec::new()));
            }
        };

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        if output.status.success() {
            info!(program, "launch command finished");
            Ok(SessionOutcome::Ok(lines))
        } else {
            warn!(program, status = %output.status, "launch command failed");
            Ok(SessionOutcome::Fail(lines))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
