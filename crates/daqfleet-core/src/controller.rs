//! Cluster I/O: status collection, ad-hoc commands and stage actions.

use crate::error::{DaqError, Result};
use crate::launch::{self, CommandLauncher, Launcher};
use crate::persist::{self, PgrepProbe, ProcessProbe};
use crate::sequencer::StageAction;
use crate::session::SessionOutcome;
use crate::status::{StatusAggregator, StatusDocument};
use crate::topology::{Topology, TopologyProvider};
use crate::transport::{BatchResult, HostOutcome, Transport};
use crate::types::{Command, DaemonKind, Host, Target, Verb};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Controller {
    topology: Arc<Topology>,
    transport: Transport,
    aggregator: StatusAggregator,
    launcher: Arc<dyn Launcher>,
}

impl Controller {
    pub fn new(
        topology: Arc<Topology>,
        launcher: Arc<dyn Launcher>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Self {
        let transport = Transport::from_config(&topology.agent);
        let aggregator = StatusAggregator::new(&topology, transport.clone(), probe);
        Self {
            topology,
            transport,
            aggregator,
            launcher,
        }
    }

    /// `tokio::process` launcher and `pgrep` probe.
    pub fn with_defaults(topology: Arc<Topology>) -> Self {
        Self::new(
            topology,
            Arc::new(CommandLauncher::default()),
            Arc::new(PgrepProbe),
        )
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn shared_topology(&self) -> Arc<Topology> {
        self.topology.clone()
    }

    /// Status of every host in the topology.
    pub async fn collect_status(&self) -> Arc<StatusDocument> {
        let hosts: Vec<Host> = self.topology.all_hosts().into_iter().cloned().collect();
        self.aggregator.collect(&hosts).await
    }

    /// Hosts a command goes to when none are named: the daemon's own roles
    /// for known daemons, otherwise the command's default target roles.
    pub fn default_hosts(&self, command: &Command) -> Result<Vec<Host>> {
        let roles = match &command.target {
            Target::Daemon(name) => match self.topology.daemon(name) {
                Some(spec) => spec.roles.clone(),
                None => self.topology.command_targets(command.name()?),
            },
            _ => self.topology.command_targets(command.name()?),
        };
        Ok(self
            .topology
            .hosts_for_roles(&roles)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Issue an ad-hoc command to `hosts`, or to its default hosts when the
    /// list is empty.
    pub async fn command(&self, command: &Command, hosts: &[String]) -> Result<BatchResult> {
        let line = command.line()?;
        let hosts = if hosts.is_empty() {
            self.default_hosts(command)?
        } else {
            self.topology.resolve_hosts(hosts)?
        };
        if hosts.is_empty() {
            return Err(DaqError::EmptyHostList);
        }

        let names: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
        info!("{}", command.describe(&names));

        if let Target::Daemon(name) = &command.target {
            if let Some(spec) = self.topology.daemon(name) {
                if spec.persistent {
                    return self.persistent(command, spec.name.as_str(), &line).await;
                }
                if spec.kind == DaemonKind::MasterControl && command.verb == Verb::Start {
                    if let Some(template) = &self.topology.launch.master_control {
                        return Ok(self.launch(template, name, &hosts, &line).await);
                    }
                }
            }
        }

        self.transport.dispatch_line(&hosts, &line).await
    }

    /// Carry out one stage action.
    pub async fn execute(&self, action: &StageAction) -> Result<BatchResult> {
        info!("{}", action.describe());
        match action {
            StageAction::Dispatch { command, hosts } => {
                let hosts = self.topology.resolve_hosts(hosts)?;
                self.transport.dispatch(&hosts, command).await
            }
            StageAction::Launch { daemon, hosts } => {
                let hosts = self.topology.resolve_hosts(hosts)?;
                let line = Command::start_daemon(daemon.clone()).line()?;
                match &self.topology.launch.master_control {
                    Some(template) => Ok(self.launch(template, daemon, &hosts, &line).await),
                    None => self.transport.dispatch_line(&hosts, &line).await,
                }
            }
            StageAction::StopPersistent { daemon, .. } => {
                let command = Command::stop_daemon(daemon.clone());
                let line = command.line()?;
                self.persistent(&command, daemon, &line).await
            }
        }
    }

    async fn launch(&self, template: &[String], daemon: &str, hosts: &[Host], line: &str) -> BatchResult {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let argv = launch::render(template, &host.name, daemon);
            let outcome = match self.launcher.launch(&argv).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(host = %host.name, daemon, error = %e, "launch failed");
                    SessionOutcome::Fail(vec![e.to_string()])
                }
            };
            outcomes.push(HostOutcome {
                host: host.name.clone(),
                outcome,
            });
        }
        BatchResult {
            line: line.to_string(),
            outcomes,
        }
    }

    /// Start or stop a daemon that lives outside the agent protocol.
    async fn persistent(&self, command: &Command, daemon: &str, line: &str) -> Result<BatchResult> {
        let server = self
            .topology
            .server()
            .ok_or_else(|| DaqError::InvalidTopology("no server host".into()))?
            .clone();

        let outcome = match command.verb {
            Verb::Start => match &self.topology.launch.persistent {
                Some(template) => {
                    return Ok(self
                        .launch(template, daemon, std::slice::from_ref(&server), line)
                        .await)
                }
                None => SessionOutcome::Fail(vec![format!(
                    "{daemon}: no launch command configured for persistent daemons"
                )]),
            },
            Verb::Stop => persist::stop(&self.topology.persist, daemon).await,
            verb => {
                return Err(DaqError::InvalidCommand {
                    verb: verb.to_string(),
                    reason: format!("'{daemon}' only supports start and stop"),
                })
            }
        };

        Ok(BatchResult {
            line: line.to_string(),
            outcomes: vec![HostOutcome {
                host: server.name,
                outcome,
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
