use crate::output::{print_json, print_table};
use daqfleet_core::status::StatusRecord;
use daqfleet_core::{Controller, StatusDocument};
use std::path::Path;
use std::sync::Arc;

pub fn run(path: &Path, hosts: &[String], json: bool) -> anyhow::Result<()> {
    let topology = super::load_topology(path)?;
    if !hosts.is_empty() {
        topology.resolve_hosts(hosts)?;
    }
    let controller = Controller::with_defaults(Arc::new(topology));

    let doc = super::runtime()?.block_on(controller.collect_status());
    let doc = filter(&doc, hosts);

    if json {
        return print_json(&doc);
    }

    let mut rows = Vec::new();
    for record in doc.hosts.values() {
        rows.extend(rows_for(record));
    }
    print_table(&["HOST", "ROLE", "DAEMON", "STATE"], rows);

    let unreachable = doc.hosts.values().filter(|r| !r.reachable).count();
    if unreachable > 0 {
        println!();
        println!("{unreachable} host(s) unreachable");
    }
    Ok(())
}

fn filter(doc: &StatusDocument, hosts: &[String]) -> StatusDocument {
    let mut doc = doc.clone();
    if !hosts.is_empty() {
        doc.hosts.retain(|name, _| hosts.contains(name));
    }
    doc
}

/// One row per daemon, and one per daemon and unit for per-unit daemons.
fn rows_for(record: &StatusRecord) -> Vec<Vec<String>> {
    let host = record.host.clone();
    let role = record.role.to_string();
    if !record.reachable {
        return vec![vec![host, role, "-".into(), "unreachable".into()]];
    }

    let mut rows: Vec<Vec<String>> = record
        .daemons
        .iter()
        .map(|(daemon, state)| vec![host.clone(), role.clone(), daemon.clone(), state.to_string()])
        .collect();
    for (unit, daemons) in &record.units {
        for (daemon, state) in daemons {
            rows.push(vec![
                host.clone(),
                role.clone(),
                format!("{daemon}:{unit}"),
                state.to_string(),
            ]);
        }
    }
    rows
}
