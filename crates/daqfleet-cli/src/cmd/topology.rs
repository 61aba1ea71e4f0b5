use crate::output::{join_or_dash, print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use daqfleet_core::topology::WarnLevel;
use daqfleet_core::Topology;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum TopologySubcommand {
    /// Print hosts, daemons and data blocks (default)
    Show,

    /// Check the topology for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(path: &Path, subcmd: Option<TopologySubcommand>, json: bool) -> anyhow::Result<()> {
    match subcmd.unwrap_or(TopologySubcommand::Show) {
        TopologySubcommand::Show => show(path, json),
        TopologySubcommand::Validate => validate(path, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let topology = Topology::load(path)
        .with_context(|| format!("failed to load topology from {}", path.display()))?;

    if json {
        return print_json(&topology);
    }

    println!("Fleet: {}  ({})", topology.name, path.display());
    println!();

    let hosts: Vec<Vec<String>> = topology
        .all_hosts()
        .into_iter()
        .map(|h| {
            vec![
                h.name.clone(),
                h.role.to_string(),
                h.endpoint(topology.agent.port).to_string(),
                join_or_dash(&h.units),
            ]
        })
        .collect();
    print_table(&["HOST", "ROLE", "AGENT", "UNITS"], hosts);
    println!();

    let daemons: Vec<Vec<String>> = topology
        .daemons
        .iter()
        .map(|d| {
            let stop_tier = d.stop_tier.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
            let mut flags = Vec::new();
            if d.per_unit {
                flags.push("per-unit");
            }
            if d.persistent {
                flags.push("persistent");
            }
            vec![
                d.name.clone(),
                d.kind.as_str().to_string(),
                join_or_dash(&d.roles),
                d.tier.to_string(),
                stop_tier,
                join_or_dash(&flags),
            ]
        })
        .collect();
    print_table(&["DAEMON", "KIND", "ROLES", "TIER", "STOP", "FLAGS"], daemons);

    if !topology.data_blocks.ids.is_empty() {
        println!();
        println!(
            "Data blocks: {}  (tier {})",
            topology.data_blocks.ids.join(", "),
            topology.data_blocks.tier
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let topology = Topology::load(path)
        .with_context(|| format!("failed to load topology from {}", path.display()))?;
    let warnings = topology.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Topology is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("topology validation found errors");
    }

    Ok(())
}
