//! Persistent server daemons.
//!
//! These run on the server host outside the agent protocol. Liveness is
//! inferred from two independent signals (a matching process and a pid
//! file in the control directory); shutdown is requested by touching a quit
//! file and waiting for the daemon to remove its pid file.

use crate::session::SessionOutcome;
use crate::topology::PersistConfig;
use crate::types::Readiness;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// ProcessProbe
// ---------------------------------------------------------------------------

/// Checks whether a process with a matching command line exists.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_running(&self, pattern: &str) -> bool;
}

/// Probe backed by `pgrep -f <pattern>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgrepProbe;

#[async_trait]
impl ProcessProbe for PgrepProbe {
    async fn is_running(&self, pattern: &str) -> bool {
        let status = tokio::process::Command::new("pgrep")
            .arg("-f")
            .arg(pattern)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) => s.success(),
            Err(e) => {
                debug!(pattern, error = %e, "pgrep unavailable");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

pub async fn readiness(cfg: &PersistConfig, probe: &dyn ProcessProbe, daemon: &str) -> Readiness {
    let mut present = 0;
    if probe.is_running(&cfg.pattern_for(daemon)).await {
        present += 1;
    }
    if cfg.pid_file(daemon).exists() {
        present += 1;
    }
    Readiness::from_presence(present)
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

/// Ask a persistent daemon to exit via its quit file.
///
/// Returns `Fail` without touching anything when no pid file exists, and
/// `Fail` when the pid file is still present after the configured wait.
/// The quit file is removed in both the success and the timeout case.
pub async fn stop(cfg: &PersistConfig, daemon: &str) -> SessionOutcome {
    let pid_file = cfg.pid_file(daemon);
    if !pid_file.exists() {
        warn!(daemon, pid_file = %pid_file.display(), "no pid file, nothing to stop");
        return SessionOutcome::Fail(vec![format!(
            "{daemon}: no pid file at {}",
            pid_file.display()
        )]);
    }

    let quit_file = cfg.quit_file(daemon);
    if let Err(e) = std::fs::write(&quit_file, b"") {
        warn!(daemon, error = %e, "could not create quit file");
        return SessionOutcome::Fail(vec![format!(
            "{daemon}: could not create {}: {e}",
            quit_file.display()
        )]);
    }

    let wait = Duration::from_secs(cfg.stop_wait_secs);
    let exited = wait_for_removal(&pid_file, wait).await;
    if let Err(e) = std::fs::remove_file(&quit_file) {
        debug!(daemon, error = %e, "quit file already gone");
    }

    if exited {
        info!(daemon, "persistent daemon stopped");
        SessionOutcome::Ok(vec![format!("{daemon}: stopped")])
    } else {
        warn!(daemon, ?wait, "persistent daemon did not exit");
        SessionOutcome::Fail(vec![format!(
            "{daemon}: pid file still present after {}s",
            cfg.stop_wait_secs
        )])
    }
}

async fn wait_for_removal(path: &Path, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if !path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(STOP_POLL_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FixedProbe;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PersistConfig {
        PersistConfig {
            control_dir: dir.path().to_path_buf(),
            stop_wait_secs: 1,
            ..PersistConfig::default()
        }
    }

    #[tokio::test]
    async fn process_and_pid_file_is_running() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(cfg.pid_file("tcs_interface"), "1234").unwrap();
        let r = readiness(&cfg, &FixedProbe::new(true), "tcs_interface").await;
        assert_eq!(r, Readiness::Running);
    }

    #[tokio::test]
    async fn pid_file_only_is_transitioning() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(cfg.pid_file("tcs_interface"), "1234").unwrap();
        let r = readiness(&cfg, &FixedProbe::new(false), "tcs_interface").await;
        assert_eq!(r, Readiness::Transitioning);
    }

    #[tokio::test]
    async fn neither_signal_is_stopped() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let r = readiness(&cfg, &FixedProbe::new(false), "tcs_interface").await;
        assert_eq!(r, Readiness::Stopped);
    }

    #[tokio::test]
    async fn stop_without_pid_file_does_nothing() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let outcome = stop(&cfg, "gain_manager").await;
        assert!(matches!(outcome, SessionOutcome::Fail(_)));
        assert!(!cfg.quit_file("gain_manager").exists());
    }

    #[tokio::test]
    async fn stop_waits_for_pid_file_removal() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let pid_file = cfg.pid_file("gain_manager");
        std::fs::write(&pid_file, "99").unwrap();

        // Simulated daemon: exits once it sees the quit file.
        let quit_file = cfg.quit_file("gain_manager");
        let daemon = tokio::spawn(async move {
            while !quit_file.exists() {
                sleep(Duration::from_millis(20)).await;
            }
            std::fs::remove_file(&pid_file).unwrap();
        });

        let outcome = stop(&cfg, "gain_manager").await;
        daemon.await.unwrap();
        assert!(outcome.is_ok(), "{outcome:?}");
        assert!(!cfg.quit_file("gain_manager").exists());
    }

    #[tokio::test]
    async fn stop_gives_up_when_daemon_ignores_quit() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(cfg.pid_file("gain_manager"), "99").unwrap();
        let outcome = stop(&cfg, "gain_manager").await;
        assert!(matches!(outcome, SessionOutcome::Fail(_)));
        assert!(cfg.pid_file("gain_manager").exists());
        assert!(!cfg.quit_file("gain_manager").exists());
    }
}
