//! Data-driven stage lists built from the topology.
//!
//! Every daemon and the data-block set carry a start tier and a stop tier.
//! A plan has one stage per distinct tier, in ascending order.
//!
//! Teardown is not the reverse of startup. Without an explicit `stop_tier`
//! elements fall into four stop stages:
//!
//! 0. persistent interface daemons and per-host daemons away from the server
//! 1. write clients
//! 2. data blocks, together with the server daemons
//! 3. master control
//!
//! Persistent daemons are never started by a plan; they are stopped
//! through their quit file.

use crate::status::StatusDocument;
use crate::topology::{Topology, TopologyProvider};
use crate::types::{
    data_block_key, Command, DaemonKind, DaemonSpec, Direction, Host, HostRole, Readiness, Target,
    Verb,
};
use serde::Serialize;
use std::collections::BTreeMap;

const STOP_INTERFACES: u32 = 0;
const STOP_WRITERS: u32 = 1;
const STOP_BUFFERS: u32 = 2;
const STOP_MASTER: u32 = 3;

// ---------------------------------------------------------------------------
// StageAction / Expectation
// ---------------------------------------------------------------------------

/// Work issued when a stage becomes current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageAction {
    /// Send `command` to the agents on `hosts`.
    Dispatch { command: Command, hosts: Vec<String> },
    /// Start `daemon` on `hosts` through the remote launcher.
    Launch { daemon: String, hosts: Vec<String> },
    /// Stop a persistent server daemon through its quit file.
    StopPersistent { daemon: String, hosts: Vec<String> },
}

impl StageAction {
    pub fn hosts(&self) -> &[String] {
        match self {
            StageAction::Dispatch { hosts, .. }
            | StageAction::Launch { hosts, .. }
            | StageAction::StopPersistent { hosts, .. } => hosts,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StageAction::Dispatch { command, hosts } => command.describe(hosts),
            StageAction::Launch { daemon, hosts } => {
                Command::start_daemon(daemon.clone()).describe(hosts)
            }
            StageAction::StopPersistent { daemon, hosts } => {
                Command::stop_daemon(daemon.clone()).describe(hosts)
            }
        }
    }
}

/// One readiness check: `key` on `host` (in `unit`, if per-unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expectation {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,
    pub key: String,
}

// ---------------------------------------------------------------------------
// Stage / Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub label: String,
    pub tier: u32,
    pub actions: Vec<StageAction>,
    pub expectations: Vec<Expectation>,
}

impl Stage {
    /// A stage with no expectations is ready immediately.
    pub fn is_ready(&self, doc: &StatusDocument, target: Readiness) -> bool {
        self.expectations
            .iter()
            .all(|e| doc.readiness(&e.host, e.unit, &e.key) == target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub direction: Direction,
    pub stages: Vec<Stage>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

pub fn start_plan(topology: &Topology) -> Plan {
    build(topology, Direction::Start)
}

pub fn stop_plan(topology: &Topology) -> Plan {
    build(topology, Direction::Stop)
}

pub fn plan_for(topology: &Topology, direction: Direction) -> Plan {
    build(topology, direction)
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

enum Element<'a> {
    Daemon(&'a DaemonSpec),
    DataBlocks,
}

fn default_stop_tier(daemon: &DaemonSpec) -> u32 {
    match daemon.kind {
        DaemonKind::MasterControl => STOP_MASTER,
        DaemonKind::WriteClient => STOP_WRITERS,
        DaemonKind::Daemon if daemon.persistent => STOP_INTERFACES,
        DaemonKind::Daemon if daemon.runs_on(HostRole::Server) => STOP_BUFFERS,
        DaemonKind::Daemon => STOP_INTERFACES,
    }
}

fn build(topology: &Topology, direction: Direction) -> Plan {
    let daemons = topology
        .daemons
        .iter()
        .filter(|d| direction == Direction::Stop || !d.persistent);
    let has_blocks = !topology.data_blocks.ids.is_empty();

    let mut tiers: BTreeMap<u32, Vec<Element>> = BTreeMap::new();
    if has_blocks {
        let blocks = &topology.data_blocks;
        let tier = match direction {
            Direction::Start => blocks.tier,
            Direction::Stop => blocks.stop_tier.unwrap_or(STOP_BUFFERS),
        };
        tiers.entry(tier).or_default().push(Element::DataBlocks);
    }
    for daemon in daemons {
        let tier = match direction {
            Direction::Start => daemon.tier,
            Direction::Stop => daemon.stop_tier.unwrap_or_else(|| default_stop_tier(daemon)),
        };
        tiers.entry(tier).or_default().push(Element::Daemon(daemon));
    }

    let stages = tiers
        .into_iter()
        .filter_map(|(tier, elements)| {
            let mut stage = Stage {
                label: String::new(),
                tier,
                actions: Vec::new(),
                expectations: Vec::new(),
            };
            let mut labels = Vec::new();
            for element in elements {
                let label = match element {
                    Element::Daemon(d) => add_daemon(&mut stage, topology, d, direction),
                    Element::DataBlocks => add_data_blocks(&mut stage, topology, direction),
                };
                labels.extend(label);
            }
            stage.label = labels.join(", ");
            (!stage.actions.is_empty()).then_some(stage)
        })
        .collect();

    Plan { direction, stages }
}

fn host_names(hosts: &[&Host]) -> Vec<String> {
    hosts.iter().map(|h| h.name.clone()).collect()
}

/// Per-unit checks fall back to the host-level value on hosts without units.
fn expect_on(stage: &mut Stage, hosts: &[&Host], key: &str, per_unit: bool) {
    for host in hosts {
        if per_unit && !host.units.is_empty() {
            for unit in &host.units {
                stage.expectations.push(Expectation {
                    host: host.name.clone(),
                    unit: Some(*unit),
                    key: key.to_string(),
                });
            }
        } else {
            stage.expectations.push(Expectation {
                host: host.name.clone(),
                unit: None,
                key: key.to_string(),
            });
        }
    }
}

fn add_daemon(
    stage: &mut Stage,
    topology: &Topology,
    daemon: &DaemonSpec,
    direction: Direction,
) -> Option<String> {
    let hosts: Vec<&Host> = if daemon.persistent {
        topology.server().into_iter().collect()
    } else {
        topology.hosts_for_roles(&daemon.roles)
    };
    if hosts.is_empty() {
        return None;
    }
    let names = host_names(&hosts);

    let action = match (daemon.kind, direction) {
        (_, Direction::Stop) if daemon.persistent => StageAction::StopPersistent {
            daemon: daemon.name.clone(),
            hosts: names,
        },
        (DaemonKind::MasterControl, Direction::Start) if topology.launch.master_control.is_some() => {
            StageAction::Launch {
                daemon: daemon.name.clone(),
                hosts: names,
            }
        }
        (DaemonKind::WriteClient, Direction::Start) => StageAction::Dispatch {
            command: Command::new(Verb::Start, Target::WriteClients),
            hosts: names,
        },
        (DaemonKind::WriteClient, Direction::Stop) => StageAction::Dispatch {
            command: Command::new(Verb::Stop, Target::WriteClients),
            hosts: names,
        },
        (_, Direction::Start) => StageAction::Dispatch {
            command: Command::start_daemon(daemon.name.clone()),
            hosts: names,
        },
        (_, Direction::Stop) => StageAction::Dispatch {
            command: Command::stop_daemon(daemon.name.clone()),
            hosts: names,
        },
    };
    stage.actions.push(action);
    expect_on(stage, &hosts, &daemon.name, daemon.per_unit);
    Some(daemon.display_name())
}

fn add_data_blocks(stage: &mut Stage, topology: &Topology, direction: Direction) -> Option<String> {
    let (verb, command_name) = match direction {
        Direction::Start => (Verb::Init, "init_db"),
        Direction::Stop => (Verb::Destroy, "destroy_db"),
    };
    let hosts = topology.hosts_for_roles(&topology.command_targets(command_name));
    if hosts.is_empty() {
        return None;
    }
    let ids = topology.data_block_ids();
    for id in &ids {
        stage.actions.push(StageAction::Dispatch {
            command: Command::new(verb, Target::DataBlock(id.clone())),
            hosts: host_names(&hosts),
        });
        expect_on(stage, &hosts, &data_block_key(id), true);
    }
    Some(format!("data blocks {}", ids.join(" ")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
