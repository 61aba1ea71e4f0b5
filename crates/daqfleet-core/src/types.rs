use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DaqError, Result};

// ---------------------------------------------------------------------------
// HostRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Server,
    Node,
    Helper,
}

impl HostRole {
    pub fn all() -> &'static [HostRole] {
        &[HostRole::Server, HostRole::Node, HostRole::Helper]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostRole::Server => "server",
            HostRole::Node => "node",
            HostRole::Helper => "helper",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Host / Endpoint
// ---------------------------------------------------------------------------

/// TCP endpoint of a host's control agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One machine in the fleet.
///
/// `units` lists the process slots a multi-process node runs; status for
/// per-unit daemons is reported under these ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub role: HostRole,
    /// Address to connect to. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Agent port. Defaults to the topology-wide agent port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<u32>,
}

impl Host {
    pub fn new(name: impl Into<String>, role: HostRole) -> Self {
        Self {
            name: name.into(),
            role,
            address: None,
            port: None,
            units: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = Some(address.into());
        self.port = Some(port);
        self
    }

    pub fn with_units(mut self, units: impl IntoIterator<Item = u32>) -> Self {
        self.units = units.into_iter().collect();
        self
    }

    pub fn endpoint(&self, default_port: u16) -> Endpoint {
        Endpoint {
            address: self.address.clone().unwrap_or_else(|| self.name.clone()),
            port: self.port.unwrap_or(default_port),
        }
    }
}

// ---------------------------------------------------------------------------
// DaemonSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DaemonKind {
    /// The per-host control agent itself.
    MasterControl,
    /// The primary write client filling a node's data blocks.
    WriteClient,
    #[default]
    Daemon,
}

impl DaemonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonKind::MasterControl => "master_control",
            DaemonKind::WriteClient => "write_client",
            DaemonKind::Daemon => "daemon",
        }
    }
}

/// A managed daemon as described by the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default)]
    pub kind: DaemonKind,
    pub roles: Vec<HostRole>,
    /// Start ordering; lower tiers start first.
    #[serde(default)]
    pub tier: u32,
    /// Stop ordering; lower tiers stop first. When absent the daemon kind
    /// decides (see `sequencer::plan`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_tier: Option<u32>,
    /// Status is reported once per unit rather than once per host.
    #[serde(default)]
    pub per_unit: bool,
    /// Lifecycle tracked through pid/quit files on the server host instead
    /// of the agent protocol.
    #[serde(default)]
    pub persistent: bool,
}

impl DaemonSpec {
    pub fn new(name: impl Into<String>, kind: DaemonKind, roles: &[HostRole], tier: u32) -> Self {
        Self {
            name: name.into(),
            display: None,
            kind,
            roles: roles.to_vec(),
            tier,
            stop_tier: None,
            per_unit: false,
            persistent: false,
        }
    }

    pub fn display_name(&self) -> String {
        self.display
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }

    pub fn runs_on(&self, role: HostRole) -> bool {
        self.roles.contains(&role)
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Tri-state daemon status as reported by agents (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    #[default]
    Stopped,
    Transitioning,
    Running,
}

impl Readiness {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(Readiness::Stopped),
            "1" => Some(Readiness::Transitioning),
            "2" => Some(Readiness::Running),
            _ => None,
        }
    }

    /// Combine independent presence signals: none → stopped, one → transitioning,
    /// two or more → running.
    pub fn from_presence(count: u32) -> Self {
        match count {
            0 => Readiness::Stopped,
            1 => Readiness::Transitioning,
            _ => Readiness::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::Stopped => "stopped",
            Readiness::Transitioning => "transitioning",
            Readiness::Running => "running",
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Start,
    Stop,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Start => "start",
            Direction::Stop => "stop",
        }
    }

    /// Readiness every stage of a run in this direction waits for.
    pub fn target_readiness(self) -> Readiness {
        match self {
            Direction::Start => Readiness::Running,
            Direction::Stop => Readiness::Stopped,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Direction::Start),
            "stop" => Ok(Direction::Stop),
            _ => Err(DaqError::UnknownDirection(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Verb
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Start,
    Stop,
    Status,
    Init,
    Destroy,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Status => "status",
            Verb::Init => "init",
            Verb::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verb {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Verb::Start),
            "stop" => Ok(Verb::Stop),
            "status" => Ok(Verb::Status),
            "init" => Ok(Verb::Init),
            "destroy" => Ok(Verb::Destroy),
            _ => Err(DaqError::UnknownVerb(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a command acts on.
///
/// String form: `all`, `pwcs`, `buffer_<id>`, `none`, or a daemon name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    Daemon(String),
    AllDaemons,
    WriteClients,
    DataBlock(String),
    None,
}

impl Target {
    /// Name under which this target appears in a status record.
    pub fn status_key(&self) -> Option<String> {
        match self {
            Target::Daemon(name) => Some(name.clone()),
            Target::DataBlock(id) => Some(data_block_key(id)),
            _ => None,
        }
    }
}

/// Status key of a data block: `buffer_<id>`.
pub fn data_block_key(id: &str) -> String {
    format!("buffer_{id}")
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Daemon(name) => f.write_str(name),
            Target::AllDaemons => f.write_str("all"),
            Target::WriteClients => f.write_str("pwcs"),
            Target::DataBlock(id) => write!(f, "buffer_{id}"),
            Target::None => f.write_str("none"),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DaqError::InvalidCommand {
                verb: String::new(),
                reason: "empty target".to_string(),
            });
        }
        Ok(match s {
            "all" => Target::AllDaemons,
            "pwcs" => Target::WriteClients,
            "none" | "-" => Target::None,
            _ => match s.strip_prefix("buffer_") {
                Some(id) => Target::DataBlock(id.to_string()),
                None => Target::Daemon(s.to_string()),
            },
        })
    }
}

impl TryFrom<String> for Target {
    type Error = DaqError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Agent command sent for status reports.
pub const STATUS_COMMAND: &str = "daemon_info";

/// A logical command addressed to one or more agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub verb: Verb,
    pub target: Target,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Restricts the command to one process slot on a multi-process host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,
}

impl Command {
    pub fn new(verb: Verb, target: Target) -> Self {
        Self {
            verb,
            target,
            args: Vec::new(),
            unit: None,
        }
    }

    pub fn status() -> Self {
        Self::new(Verb::Status, Target::None)
    }

    pub fn start_daemon(name: impl Into<String>) -> Self {
        Self::new(Verb::Start, Target::Daemon(name.into()))
    }

    pub fn stop_daemon(name: impl Into<String>) -> Self {
        Self::new(Verb::Stop, Target::Daemon(name.into()))
    }

    pub fn with_unit(mut self, unit: u32) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Agent-side command name, e.g. `start_daemon` or `init_db`.
    pub fn name(&self) -> Result<&'static str> {
        let name = match (self.verb, &self.target) {
            (Verb::Status, Target::None) => STATUS_COMMAND,
            (Verb::Start, Target::Daemon(_)) => "start_daemon",
            (Verb::Stop, Target::Daemon(_)) => "stop_daemon",
            (Verb::Start, Target::AllDaemons) => "start_daemons",
            (Verb::Stop, Target::AllDaemons) => "stop_daemons",
            (Verb::Start, Target::WriteClients) => "start_pwcs",
            (Verb::Stop, Target::WriteClients) => "stop_pwcs",
            (Verb::Init | Verb::Start, Target::DataBlock(_)) => "init_db",
            (Verb::Destroy | Verb::Stop, Target::DataBlock(_)) => "destroy_db",
            (verb, target) => {
                return Err(DaqError::InvalidCommand {
                    verb: verb.to_string(),
                    reason: format!("target '{target}' is not valid for this verb"),
                })
            }
        };
        Ok(name)
    }

    /// Render the request line (without CRLF).
    ///
    /// Fails before any I/O when the verb/target pair is invalid or a
    /// field would break line framing.
    pub fn line(&self) -> Result<String> {
        let name = self.name()?;
        let mut line = String::from(name);
        match &self.target {
            Target::Daemon(d) | Target::DataBlock(d) => {
                self.check_token(d)?;
                line.push(' ');
                line.push_str(d);
            }
            _ => {}
        }
        for arg in &self.args {
            if arg.contains(['\r', '\n']) {
                return Err(self.invalid("argument contains a line break"));
            }
            if arg.is_empty() {
                continue;
            }
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(unit) = self.unit {
            line.push_str(&format!(" unit={unit}"));
        }
        Ok(line)
    }

    /// One-line human summary, e.g. `Starting results manager on node0 - node7`.
    pub fn describe(&self, hosts: &[String]) -> String {
        let action = match (self.verb, &self.target) {
            (Verb::Status, _) => "Querying status".to_string(),
            (Verb::Init | Verb::Start, Target::DataBlock(id)) => format!("Creating DB {id}"),
            (Verb::Destroy | Verb::Stop, Target::DataBlock(id)) => format!("Destroying DB {id}"),
            (verb, target) => {
                let gerund = match verb {
                    Verb::Stop | Verb::Destroy => "Stopping",
                    _ => "Starting",
                };
                let what = match target {
                    Target::AllDaemons => "all daemons".to_string(),
                    Target::WriteClients => "write clients".to_string(),
                    Target::Daemon(d) => d.replace('_', " "),
                    other => other.to_string(),
                };
                format!("{gerund} {what}")
            }
        };
        let unit = self.unit.map(|u| format!(":{u}")).unwrap_or_default();
        let on = if hosts.len() > 2 {
            format!("{} - {}", hosts[0], hosts[hosts.len() - 1])
        } else {
            hosts
                .iter()
                .map(|h| format!("{h}{unit}"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        format!("{action} on {on}")
    }

    fn check_token(&self, token: &str) -> Result<()> {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(self.invalid(format!("'{token}' is not a single word")));
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> DaqError {
        DaqError::InvalidCommand {
            verb: self.verb.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
