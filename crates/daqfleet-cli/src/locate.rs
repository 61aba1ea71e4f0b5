use std::path::{Path, PathBuf};

/// File name searched for when no topology path is given.
pub const TOPOLOGY_FILE: &str = "daqfleet.yaml";

/// System-wide fallback location.
pub const SYSTEM_TOPOLOGY: &str = "/etc/daqfleet/topology.yaml";

/// Resolve the topology file.
///
/// Priority:
/// 1. `--topology` flag / `DAQFLEET_TOPOLOGY` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `daqfleet.yaml`
/// 3. Fall back to `/etc/daqfleet/topology.yaml`
pub fn resolve_topology(explicit: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(explicit, &cwd)
}

fn resolve_from(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let mut dir = cwd.to_path_buf();
    loop {
        let candidate = dir.join(TOPOLOGY_FILE);
        if candidate.is_file() {
            return candidate;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    PathBuf::from(SYSTEM_TOPOLOGY)
}
