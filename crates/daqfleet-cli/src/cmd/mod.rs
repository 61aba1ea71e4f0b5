pub mod command;
pub mod run;
pub mod serve;
pub mod status;
pub mod topology;

use anyhow::Context;
use daqfleet_core::topology::WarnLevel;
use daqfleet_core::Topology;
use std::path::Path;

/// Load the topology and log its warnings.
pub fn load_topology(path: &Path) -> anyhow::Result<Topology> {
    let topology = Topology::load(path)
        .with_context(|| format!("failed to load topology from {}", path.display()))?;
    for w in topology.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => tracing::error!("{}", w.message),
        }
    }
    Ok(topology)
}

/// Runtime for the commands that talk to agents.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
