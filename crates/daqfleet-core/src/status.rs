//! Fleet status collection.
//!
//! Every agent answers `daemon_info` with one `key=value` per line. Dotted
//! keys nest, so `unit.3.udpdb=2` is daemon `udpdb` of process slot 3. The
//! lines are parsed once into a [`StatusValue`] tree and then into a typed
//! [`StatusRecord`]. Collection never fails: a host that cannot be read is
//! recorded as unreachable with master control stopped.

use crate::persist::{self, ProcessProbe};
use crate::session::SessionOutcome;
use crate::topology::{PersistConfig, Topology};
use crate::transport::Transport;
use crate::types::{Command, Host, HostRole, Readiness};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const MASTER_CONTROL: &str = "master_control";
const UNIT_KEY: &str = "unit";
const IGNORED_KEYS: &[&str] = &["host"];

// ---------------------------------------------------------------------------
// StatusValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Scalar(String),
    SubRecord(BTreeMap<String, StatusValue>),
}

/// Parse `key=value` lines into a tree.
///
/// Returns `None` when no line has the expected shape. Lines without `=`
/// are skipped; a later key replaces an earlier conflicting one.
pub fn parse_lines(lines: &[String]) -> Option<BTreeMap<String, StatusValue>> {
    let mut root = BTreeMap::new();
    let mut parsed = 0usize;

    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            debug!(line, "skipping status line without '='");
            continue;
        };
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            debug!(line, "skipping status line with empty key");
            continue;
        }
        parsed += 1;
        if IGNORED_KEYS.contains(&key) {
            continue;
        }
        let path: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &path, value.trim().to_string());
    }

    (parsed > 0).then_some(root)
}

fn insert_path(map: &mut BTreeMap<String, StatusValue>, path: &[&str], value: String) {
    match path {
        [] => {}
        [leaf] => {
            map.insert(leaf.to_string(), StatusValue::Scalar(value));
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| StatusValue::SubRecord(BTreeMap::new()));
            if let StatusValue::Scalar(_) = entry {
                *entry = StatusValue::SubRecord(BTreeMap::new());
            }
            if let StatusValue::SubRecord(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StatusRecord
// ---------------------------------------------------------------------------

/// One host's view of its daemons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub host: String,
    pub role: HostRole,
    pub reachable: bool,
    pub daemons: BTreeMap<String, Readiness>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub units: BTreeMap<u32, BTreeMap<String, Readiness>>,
    /// Fields that are not readiness codes, keyed by their dotted path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl StatusRecord {
    pub fn unreachable(host: &Host) -> Self {
        let mut daemons = BTreeMap::new();
        daemons.insert(MASTER_CONTROL.to_string(), Readiness::Stopped);
        Self {
            host: host.name.clone(),
            role: host.role,
            reachable: false,
            daemons,
            units: BTreeMap::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn from_tree(host: &Host, tree: BTreeMap<String, StatusValue>) -> Self {
        let mut record = Self {
            host: host.name.clone(),
            role: host.role,
            reachable: true,
            daemons: BTreeMap::new(),
            units: BTreeMap::new(),
            details: BTreeMap::new(),
        };

        for (key, value) in tree {
            match value {
                StatusValue::Scalar(s) => match Readiness::from_code(&s) {
                    Some(r) => {
                        record.daemons.insert(key, r);
                    }
                    None => {
                        record.details.insert(key, s);
                    }
                },
                StatusValue::SubRecord(units) if key == UNIT_KEY => {
                    for (unit, fields) in units {
                        record.absorb_unit(&unit, fields);
                    }
                }
                StatusValue::SubRecord(sub) => flatten_details(&key, sub, &mut record.details),
            }
        }
        record
    }

    fn absorb_unit(&mut self, unit: &str, fields: StatusValue) {
        let prefix = format!("{UNIT_KEY}.{unit}");
        match (unit.parse::<u32>().ok(), fields) {
            (Some(id), StatusValue::SubRecord(fields)) => {
                let slot = self.units.entry(id).or_default();
                for (name, value) in fields {
                    let path = format!("{prefix}.{name}");
                    match value {
                        StatusValue::Scalar(s) => match Readiness::from_code(&s) {
                            Some(r) => {
                                slot.insert(name, r);
                            }
                            None => {
                                self.details.insert(path, s);
                            }
                        },
                        StatusValue::SubRecord(sub) => {
                            flatten_details(&path, sub, &mut self.details)
                        }
                    }
                }
            }
            (_, StatusValue::Scalar(s)) => {
                self.details.insert(prefix, s);
            }
            (None, StatusValue::SubRecord(sub)) => flatten_details(&prefix, sub, &mut self.details),
        }
    }

    pub fn readiness(&self, unit: Option<u32>, daemon: &str) -> Readiness {
        let found = match unit {
            Some(u) => self.units.get(&u).and_then(|m| m.get(daemon)),
            None => self.daemons.get(daemon),
        };
        found.copied().unwrap_or_default()
    }
}

fn flatten_details(
    prefix: &str,
    sub: BTreeMap<String, StatusValue>,
    out: &mut BTreeMap<String, String>,
) {
    for (key, value) in sub {
        let path = format!("{prefix}.{key}");
        match value {
            StatusValue::Scalar(s) => {
                out.insert(path, s);
            }
            StatusValue::SubRecord(inner) => flatten_details(&path, inner, out),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusDocument
// ---------------------------------------------------------------------------

/// Immutable snapshot of one status scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub collected_at: DateTime<Utc>,
    pub hosts: BTreeMap<String, StatusRecord>,
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            collected_at: Utc::now(),
            hosts: BTreeMap::new(),
        }
    }
}

impl StatusDocument {
    pub fn record(&self, host: &str) -> Option<&StatusRecord> {
        self.hosts.get(host)
    }

    /// Readiness of `daemon` on `host` (optionally in one unit). Missing
    /// hosts, units and daemons read as `Stopped`.
    pub fn readiness(&self, host: &str, unit: Option<u32>, daemon: &str) -> Readiness {
        self.hosts
            .get(host)
            .map(|r| r.readiness(unit, daemon))
            .unwrap_or_default()
    }

    pub fn is_reachable(&self, host: &str) -> bool {
        self.hosts.get(host).is_some_and(|r| r.reachable)
    }

    /// True when both snapshots report the same per-host state.
    pub fn same_state(&self, other: &StatusDocument) -> bool {
        self.hosts == other.hosts
    }
}

// ---------------------------------------------------------------------------
// StatusAggregator
// ---------------------------------------------------------------------------

pub struct StatusAggregator {
    transport: Transport,
    persist: PersistConfig,
    probe: Arc<dyn ProcessProbe>,
    persistent: Vec<String>,
    master_control: String,
}

impl StatusAggregator {
    pub fn new(topology: &Topology, transport: Transport, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            transport,
            persist: topology.persist.clone(),
            probe,
            persistent: topology
                .persistent_daemons()
                .iter()
                .map(|d| d.name.clone())
                .collect(),
            master_control: topology
                .master_control()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| MASTER_CONTROL.to_string()),
        }
    }

    /// Query every host once and build a snapshot.
    pub async fn collect(&self, hosts: &[Host]) -> Arc<StatusDocument> {
        let mut doc = StatusDocument::default();
        if hosts.is_empty() {
            return Arc::new(doc);
        }

        let result = match self.transport.dispatch(hosts, &Command::status()).await {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(error = %e, "status dispatch failed");
                None
            }
        };

        for host in hosts {
            let outcome = result.as_ref().and_then(|r| r.get(&host.name));
            let record = match outcome {
                Some(SessionOutcome::Ok(lines)) => match parse_lines(lines) {
                    Some(tree) => StatusRecord::from_tree(host, tree),
                    None => {
                        debug!(host = %host.name, "malformed status response");
                        self.unreachable(host)
                    }
                },
                _ => self.unreachable(host),
            };
            doc.hosts.insert(host.name.clone(), record);
        }

        if let Some(server) = hosts.iter().find(|h| h.role == HostRole::Server) {
            for daemon in &self.persistent {
                let readiness = persist::readiness(&self.persist, self.probe.as_ref(), daemon).await;
                if let Some(record) = doc.hosts.get_mut(&server.name) {
                    record.daemons.insert(daemon.clone(), readiness);
                }
            }
        }

        doc.collected_at = Utc::now();
        Arc::new(doc)
    }

    fn unreachable(&self, host: &Host) -> StatusRecord {
        let mut record = StatusRecord::unreachable(host);
        if self.master_control != MASTER_CONTROL {
            record.daemons.clear();
            record
                .daemons
                .insert(self.master_control.clone(), Readiness::Stopped);
        }
        record
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
