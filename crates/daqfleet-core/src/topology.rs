//! Static fleet description: hosts, daemons, data blocks and agent policy.
//!
//! Loaded once from YAML and treated as immutable afterwards. The
//! orchestrator only consumes it through [`TopologyProvider`] and a few
//! lookup helpers.

use crate::error::{DaqError, Result};
use crate::types::{DaemonKind, DaemonSpec, Host, HostRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

// ---------------------------------------------------------------------------
// TopologyProvider
// ---------------------------------------------------------------------------

/// Read-only view of the fleet consumed by the orchestrator.
pub trait TopologyProvider {
    fn list_hosts(&self, role: HostRole) -> Vec<&Host>;
    fn list_daemons(&self, role: HostRole) -> Vec<&DaemonSpec>;
    fn data_block_ids(&self) -> Vec<String>;
    /// Host roles an agent command (e.g. `init_db`) is sent to by default.
    fn command_targets(&self, command: &str) -> Vec<HostRole>;
}

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// How control sessions talk to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    /// Bound on a single connect attempt or write.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Bound on reading one full response.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_max_response_lines")]
    pub max_response_lines: usize,
}

fn default_agent_port() -> u16 {
    57001
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    2000
}

fn default_io_timeout_ms() -> u64 {
    2000
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_max_response_lines() -> usize {
    32
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: default_agent_port(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            max_response_lines: default_max_response_lines(),
        }
    }
}

// ---------------------------------------------------------------------------
// PollConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    #[serde(default = "default_slow_interval_ms")]
    pub slow_interval_ms: u64,
    /// Number of ticks the fast cadence lasts before reverting to slow.
    #[serde(default = "default_fast_window_ticks")]
    pub fast_window_ticks: u32,
    /// Readiness polls a stage gets before the run moves on regardless.
    #[serde(default = "default_stage_retry_budget")]
    pub stage_retry_budget: u32,
}

fn default_fast_interval_ms() -> u64 {
    1000
}

fn default_slow_interval_ms() -> u64 {
    20_000
}

fn default_fast_window_ticks() -> u32 {
    60
}

fn default_stage_retry_budget() -> u32 {
    20
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval_ms(),
            slow_interval_ms: default_slow_interval_ms(),
            fast_window_ticks: default_fast_window_ticks(),
            stage_retry_budget: default_stage_retry_budget(),
        }
    }
}

impl PollConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// DataBlockConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlockConfig {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default = "default_data_block_tier")]
    pub tier: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_tier: Option<u32>,
}

fn default_data_block_tier() -> u32 {
    1
}

impl Default for DataBlockConfig {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            tier: default_data_block_tier(),
            stop_tier: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PersistConfig
// ---------------------------------------------------------------------------

/// Filesystem convention for persistent server daemons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Directory holding `<daemon>.pid` and `<daemon>.quit` files.
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
    /// `pgrep -f` pattern; `{daemon}` is replaced with the daemon name.
    #[serde(default = "default_process_pattern")]
    pub process_pattern: String,
    #[serde(default = "default_stop_wait_secs")]
    pub stop_wait_secs: u64,
}

fn default_control_dir() -> PathBuf {
    PathBuf::from("/var/run/daqfleet")
}

fn default_process_pattern() -> String {
    "^perl.*server_{daemon}.pl".to_string()
}

fn default_stop_wait_secs() -> u64 {
    10
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            control_dir: default_control_dir(),
            process_pattern: default_process_pattern(),
            stop_wait_secs: default_stop_wait_secs(),
        }
    }
}

impl PersistConfig {
    pub fn pattern_for(&self, daemon: &str) -> String {
        self.process_pattern.replace("{daemon}", daemon)
    }

    pub fn pid_file(&self, daemon: &str) -> PathBuf {
        self.control_dir.join(format!("{daemon}.pid"))
    }

    pub fn quit_file(&self, daemon: &str) -> PathBuf {
        self.control_dir.join(format!("{daemon}.quit"))
    }
}

// ---------------------------------------------------------------------------
// LaunchConfig
// ---------------------------------------------------------------------------

/// Remote launch commands for daemons that cannot be started through an agent.
///
/// Each entry is an argv template; `{host}` and `{daemon}` are substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LaunchConfig {
    /// e.g. `["ssh", "-x", "-l", "dada", "{host}", "client_master_control.pl"]`.
    /// When unset, master control is started with `start_daemon` like any
    /// other daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_control: Option<Vec<String>>,
    /// e.g. `["ssh", "-x", "-l", "dada", "{host}", "server_{daemon}.pl"]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Topology (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub daemons: Vec<DaemonSpec>,
    #[serde(default)]
    pub data_blocks: DataBlockConfig,
    /// Agent command name → roles it is sent to when no hosts are given.
    #[serde(default = "default_command_targets")]
    pub command_targets: BTreeMap<String, Vec<HostRole>>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub persist: PersistConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
}

fn default_version() -> u32 {
    1
}

fn default_command_targets() -> BTreeMap<String, Vec<HostRole>> {
    use HostRole::{Helper, Node};
    let mut m = BTreeMap::new();
    m.insert("init_db".to_string(), vec![Node, Helper]);
    m.insert("destroy_db".to_string(), vec![Node, Helper]);
    m.insert("start_pwcs".to_string(), vec![Node]);
    m.insert("stop_pwcs".to_string(), vec![Node]);
    m.insert("start_daemons".to_string(), vec![Node]);
    m.insert("stop_daemons".to_string(), vec![Node, Helper]);
    m.insert("default".to_string(), vec![Node]);
    m
}

const KNOWN_COMMANDS: &[&str] = &[
    "daemon_info",
    "start_daemon",
    "stop_daemon",
    "start_daemons",
    "stop_daemons",
    "start_pwcs",
    "stop_pwcs",
    "init_db",
    "destroy_db",
    "default",
];

impl TopologyProvider for Topology {
    fn list_hosts(&self, role: HostRole) -> Vec<&Host> {
        self.hosts.iter().filter(|h| h.role == role).collect()
    }

    fn list_daemons(&self, role: HostRole) -> Vec<&DaemonSpec> {
        self.daemons.iter().filter(|d| d.runs_on(role)).collect()
    }

    fn data_block_ids(&self) -> Vec<String> {
        self.data_blocks.ids.clone()
    }

    fn command_targets(&self, command: &str) -> Vec<HostRole> {
        self.command_targets
            .get(command)
            .or_else(|| self.command_targets.get("default"))
            .cloned()
            .unwrap_or_else(|| vec![HostRole::Node])
    }
}

impl Topology {
    pub fn new(name: impl Into<String>, hosts: Vec<Host>) -> Self {
        Self {
            version: 1,
            name: name.into(),
            hosts,
            daemons: Vec::new(),
            data_blocks: DataBlockConfig::default(),
            command_targets: default_command_targets(),
            agent: AgentConfig::default(),
            poll: PollConfig::default(),
            persist: PersistConfig::default(),
            launch: LaunchConfig::default(),
        }
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn daemon(&self, name: &str) -> Option<&DaemonSpec> {
        self.daemons.iter().find(|d| d.name == name)
    }

    /// The single server host, if the topology has one.
    pub fn server(&self) -> Option<&Host> {
        self.hosts.iter().find(|h| h.role == HostRole::Server)
    }

    /// Every host in status order: servers, then nodes, then helpers.
    pub fn all_hosts(&self) -> Vec<&Host> {
        HostRole::all()
            .iter()
            .flat_map(|role| self.list_hosts(*role))
            .collect()
    }

    pub fn hosts_for_roles(&self, roles: &[HostRole]) -> Vec<&Host> {
        self.all_hosts()
            .into_iter()
            .filter(|h| roles.contains(&h.role))
            .collect()
    }

    /// Resolve host names to topology hosts, failing on the first unknown name.
    pub fn resolve_hosts<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Host>> {
        names
            .iter()
            .map(|n| {
                self.host(n.as_ref())
                    .cloned()
                    .ok_or_else(|| DaqError::UnknownHost(n.as_ref().to_string()))
            })
            .collect()
    }

    pub fn master_control(&self) -> Option<&DaemonSpec> {
        self.daemons
            .iter()
            .find(|d| d.kind == DaemonKind::MasterControl)
    }

    pub fn persistent_daemons(&self) -> Vec<&DaemonSpec> {
        self.daemons.iter().filter(|d| d.persistent).collect()
    }

    // -----------------------------------------------------------------------
    // Load / save
    // -----------------------------------------------------------------------

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let topology: Topology = serde_yaml::from_str(data)?;
        topology.check()?;
        Ok(topology)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DaqError::TopologyNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Structural problems that make the topology unusable.
    pub fn check(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(DaqError::InvalidTopology("no hosts defined".into()));
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.name.is_empty() || host.name.chars().any(char::is_whitespace) {
                return Err(DaqError::InvalidTopology(format!(
                    "invalid host name '{}'",
                    host.name
                )));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(DaqError::InvalidTopology(format!(
                    "duplicate host '{}'",
                    host.name
                )));
            }
        }

        let servers = self.list_hosts(HostRole::Server).len();
        if servers > 1 {
            return Err(DaqError::InvalidTopology(format!(
                "expected at most one server host, found {servers}"
            )));
        }

        let mut seen = HashSet::new();
        for daemon in &self.daemons {
            if daemon.name.is_empty() || daemon.name.chars().any(char::is_whitespace) {
                return Err(DaqError::InvalidTopology(format!(
                    "invalid daemon name '{}'",
                    daemon.name
                )));
            }
            if !seen.insert(daemon.name.as_str()) {
                return Err(DaqError::InvalidTopology(format!(
                    "duplicate daemon '{}'",
                    daemon.name
                )));
            }
        }

        if !self.persistent_daemons().is_empty() && servers == 0 {
            return Err(DaqError::InvalidTopology(
                "persistent daemons need a server host".into(),
            ));
        }

        for id in &self.data_blocks.ids {
            if id.is_empty() || id.chars().any(char::is_whitespace) {
                return Err(DaqError::InvalidTopology(format!(
                    "invalid data block id '{id}'"
                )));
            }
        }

        Ok(())
    }

    /// Suspicious but usable settings.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        if self.master_control().is_none() {
            warn("no master_control daemon defined; runs cannot start agents".into());
        }

        for daemon in &self.daemons {
            if !daemon
                .roles
                .iter()
                .any(|role| !self.list_hosts(*role).is_empty())
            {
                warn(format!(
                    "daemon '{}' targets roles with no hosts",
                    daemon.name
                ));
            }
            if daemon.persistent && daemon.roles != [HostRole::Server] {
                warn(format!(
                    "persistent daemon '{}' is only tracked on the server host",
                    daemon.name
                ));
            }
            if daemon.per_unit
                && daemon
                    .roles
                    .iter()
                    .flat_map(|role| self.list_hosts(*role))
                    .all(|h| h.units.is_empty())
            {
                warn(format!(
                    "daemon '{}' is per-unit but none of its hosts list units",
                    daemon.name
                ));
            }
        }

        for key in self.command_targets.keys() {
            if !KNOWN_COMMANDS.contains(&key.as_str()) {
                warn(format!("unknown command '{key}' in command_targets"));
            }
        }

        if self.poll.stage_retry_budget == 0 {
            warn("poll.stage_retry_budget is 0: stages never wait for readiness".into());
        }

        if self.poll.fast_interval_ms >= self.poll.slow_interval_ms {
            warn(format!(
                "poll.fast_interval_ms ({}) is not faster than poll.slow_interval_ms ({})",
                self.poll.fast_interval_ms, self.poll.slow_interval_ms
            ));
        }

        if self.agent.connect_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.connect_attempts is 0: no agent can ever be reached".into(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
