//! Fan one command out to many agents.
//!
//! A dispatch runs in three phases: open every session (sequentially, each
//! with its own retry policy), write the request line to every open
//! session, then read every response. Hosts that never connect are carried
//! through as `ConnectFailed` and skipped by the later phases. All reads
//! share one response deadline, so silent hosts do not add up.

use crate::error::{DaqError, Result};
use crate::session::{Session, SessionOutcome, SessionPolicy};
use crate::topology::AgentConfig;
use crate::types::{Command, Host};
use serde::Serialize;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome for one host of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOutcome {
    pub host: String,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
}

/// Per-host outcomes of one dispatch, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub line: String,
    pub outcomes: Vec<HostOutcome>,
}

impl BatchResult {
    pub fn get(&self, host: &str) -> Option<&SessionOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.host == host)
            .map(|o| &o.outcome)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.host.as_str()).collect()
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_ok())
    }

    pub fn count_ok(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_ok()).count()
    }

    /// `host: message` lines for every host that did not answer `ok`.
    ///
    /// Agent `fail` responses are reported verbatim, one entry per line.
    pub fn failures(&self) -> Vec<String> {
        let mut out = Vec::new();
        for HostOutcome { host, outcome } in &self.outcomes {
            match outcome {
                SessionOutcome::Ok(_) => {}
                SessionOutcome::Fail(lines) if lines.is_empty() => {
                    out.push(format!("{host}: command failed"))
                }
                SessionOutcome::Fail(lines) => {
                    out.extend(lines.iter().map(|l| format!("{host}: {l}")))
                }
                SessionOutcome::ConnectFailed { reason } => out.push(format!("{host}: {reason}")),
                SessionOutcome::ProtocolTimeout(_) => {
                    out.push(format!("{host}: no complete response"))
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Transport {
    policy: SessionPolicy,
    default_port: u16,
}

impl Transport {
    pub fn new(policy: SessionPolicy, default_port: u16) -> Self {
        Self {
            policy,
            default_port,
        }
    }

    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self::new(SessionPolicy::from(cfg), cfg.port)
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub async fn dispatch(&self, hosts: &[Host], command: &Command) -> Result<BatchResult> {
        let line = command.line()?;
        self.dispatch_line(hosts, &line).await
    }

    /// Send an already rendered request line.
    pub async fn dispatch_line(&self, hosts: &[Host], line: &str) -> Result<BatchResult> {
        if hosts.is_empty() {
            return Err(DaqError::EmptyHostList);
        }

        let mut seen = HashSet::new();
        let hosts: Vec<&Host> = hosts
            .iter()
            .filter(|h| seen.insert(h.name.as_str()))
            .collect();

        // Phase 1: connect
        let mut sessions = Vec::with_capacity(hosts.len());
        for host in &hosts {
            let session =
                Session::connect(host.endpoint(self.default_port), self.policy.clone()).await;
            sessions.push(session);
        }

        // Phase 2: write
        for (host, session) in hosts.iter().zip(sessions.iter_mut()) {
            if session.is_open() {
                debug!(host = %host.name, line, "sending");
                session.send(line).await;
            }
        }

        // Phase 3: read
        let deadline = Instant::now() + self.policy.response_timeout;
        let mut outcomes = Vec::with_capacity(hosts.len());
        for (host, mut session) in hosts.iter().zip(sessions) {
            let outcome = session.read_response_until(deadline).await;
            match &outcome {
                SessionOutcome::ConnectFailed { reason } => {
                    warn!(host = %host.name, %reason, "agent unreachable")
                }
                SessionOutcome::Fail(lines) => {
                    warn!(host = %host.name, line, response = ?lines, "agent reported failure")
                }
                SessionOutcome::ProtocolTimeout(lines) => {
                    warn!(host = %host.name, line, lines = lines.len(), "incomplete agent response")
                }
                SessionOutcome::Ok(_) => {}
            }
            outcomes.push(HostOutcome {
                host: host.name.clone(),
                outcome,
            });
        }

        Ok(BatchResult {
            line: line.to_string(),
            outcomes,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{closed_host, quick_policy, FakeAgent};
    use crate::types::{HostRole, Target, Verb};
    use std::time::Duration;

    fn transport() -> Transport {
        Transport::new(quick_policy(), 1)
    }

    #[tokio::test]
    async fn one_unreachable_among_five() {
        let mut agents = Vec::new();
        let mut hosts = Vec::new();
        for i in 0..4 {
            let agent = FakeAgent::spawn(|_| "ok\n".to_string()).await;
            hosts.push(agent.host(&format!("node{i}"), HostRole::Node));
            agents.push(agent);
        }
        hosts.insert(2, closed_host("node9").await);

        let result = transport()
            .dispatch(&hosts, &Command::new(Verb::Start, Target::WriteClients))
            .await
            .unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.count_ok(), 4);
        assert!(result.get("node9").unwrap().is_connect_failed());
        for agent in &agents {
            assert_eq!(agent.requests(), vec!["start_pwcs"]);
        }
        assert_eq!(result.failures().len(), 1);
        assert!(result.failures()[0].starts_with("node9: "));
    }

    /// Agent that accepts connections and never answers.
    async fn silent_host(name: &str) -> (Host, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let host = Host::new(name, HostRole::Node).with_endpoint("127.0.0.1", port);
        (host, handle)
    }

    #[tokio::test]
    async fn silent_hosts_share_one_read_deadline() {
        let mut hosts = Vec::new();
        let mut handles = Vec::new();
        for i in 0..4 {
            let (host, handle) = silent_host(&format!("node{i}")).await;
            hosts.push(host);
            handles.push(handle);
        }
        let mut policy = quick_policy();
        policy.response_timeout = Duration::from_millis(300);

        let started = Instant::now();
        let result = Transport::new(policy, 1)
            .dispatch(&hosts, &Command::status())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.outcome.label() == "protocol_timeout"));
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn duplicate_hosts_are_collapsed() {
        let agent = FakeAgent::spawn(|_| "ok\n".to_string()).await;
        let host = agent.host("node0", HostRole::Node);
        let result = transport()
            .dispatch(&[host.clone(), host], &Command::status())
            .await
            .unwrap();
        assert_eq!(result.hosts(), vec!["node0"]);
        assert_eq!(agent.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_host_list_is_rejected() {
        let err = transport().dispatch(&[], &Command::status()).await.unwrap_err();
        assert!(matches!(err, DaqError::EmptyHostList));
    }

    #[tokio::test]
    async fn invalid_command_fails_before_io() {
        let agent = FakeAgent::spawn(|_| "ok\n".to_string()).await;
        let host = agent.host("node0", HostRole::Node);
        let cmd = Command::new(Verb::Init, Target::AllDaemons);
        assert!(transport().dispatch(&[host], &cmd).await.is_err());
        assert!(agent.requests().is_empty());
    }

    #[tokio::test]
    async fn unit_selector_reaches_the_agent() {
        let agent = FakeAgent::spawn(|_| "ok\n".to_string()).await;
        let host = agent.host("node0", HostRole::Node);
        let cmd = Command::new(Verb::Init, Target::DataBlock("dada".into())).with_unit(1);
        transport().dispatch(&[host], &cmd).await.unwrap();
        assert_eq!(agent.requests(), vec!["init_db dada unit=1"]);
    }

    #[tokio::test]
    async fn agent_failures_are_reported_per_line() {
        let agent = FakeAgent::spawn(|_| "already running\npid 42\nfail\n".to_string()).await;
        let host = agent.host("node3", HostRole::Node);
        let result = transport()
            .dispatch(&[host], &Command::start_daemon("archive_manager"))
            .await
            .unwrap();
        assert_eq!(
            result.failures(),
            vec!["node3: already running", "node3: pid 42"]
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcomes"][0]["host"], "node3");
        assert_eq!(json["outcomes"][0]["outcome"], "fail");
    }
}
