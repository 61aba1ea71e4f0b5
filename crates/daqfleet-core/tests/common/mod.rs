#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct AgentState {
    running: BTreeSet<String>,
    requests: Vec<String>,
    ignore_starts: bool,
}

/// Simulated master-control agent.
///
/// Tracks which daemons and data blocks it has been told to start and
/// reports them as running (`2`) in `daemon_info`. `start_pwcs` and
/// `stop_pwcs` act on the daemon named by `write_client`.
pub struct Agent {
    pub port: u16,
    state: Arc<Mutex<AgentState>>,
    handle: JoinHandle<()>,
}

impl Agent {
    pub async fn spawn(write_client: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(AgentState::default()));
        let write_client = write_client.to_string();

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                let write_client = write_client.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let reply = handle_line(&state, line.trim_end(), &write_client);
                    let _ = writer.write_all(reply.as_bytes()).await;
                    let _ = writer.flush().await;
                });
            }
        });

        Self {
            port,
            state,
            handle,
        }
    }

    /// Keep answering `ok` to start commands without ever starting anything.
    pub fn ignore_starts(&self) {
        self.state.lock().unwrap().ignore_starts = true;
    }

    pub fn mark_running(&self, key: &str) {
        self.state.lock().unwrap().running.insert(key.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests other than status polls.
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r != "daemon_info")
            .collect()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn handle_line(state: &Mutex<AgentState>, line: &str, write_client: &str) -> String {
    let mut state = state.lock().unwrap();
    state.requests.push(line.to_string());

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let arg = words.next().unwrap_or_default().to_string();

    match command {
        "daemon_info" => {
            let mut out = String::from("host=fake\n");
            for key in &state.running {
                out.push_str(&format!("{key}=2\n"));
            }
            out.push_str("ok\n");
            return out;
        }
        "start_daemon" | "init_db" | "start_pwcs" if state.ignore_starts => {}
        "start_daemon" => {
            state.running.insert(arg);
        }
        "stop_daemon" => {
            state.running.remove(&arg);
        }
        "init_db" => {
            state.running.insert(format!("buffer_{arg}"));
        }
        "destroy_db" => {
            state.running.remove(&format!("buffer_{arg}"));
        }
        "start_pwcs" => {
            state.running.insert(write_client.to_string());
        }
        "stop_pwcs" => {
            state.running.remove(write_client);
        }
        _ => return format!("unknown command {command}\nfail\n"),
    }
    "ok\n".to_string()
}

/// Topology YAML with one server and `nodes.len()` nodes, each pointing at
/// its agent.
pub fn topology_yaml(server: &Agent, nodes: &[&Agent]) -> String {
    let mut yaml = String::from("name: scenario\nhosts:\n");
    yaml.push_str(&format!(
        "  - {{name: srv0, role: server, address: 127.0.0.1, port: {}}}\n",
        server.port
    ));
    for (i, node) in nodes.iter().enumerate() {
        yaml.push_str(&format!(
            "  - {{name: node{i}, role: node, address: 127.0.0.1, port: {}}}\n",
            node.port
        ));
    }
    yaml.push_str(
        r#"daemons:
  - name: master_control
    kind: master_control
    roles: [server, node, helper]
    tier: 0
  - name: udpdb
    kind: write_client
    roles: [node]
    tier: 2
  - name: results_manager
    roles: [server]
    tier: 3
data_blocks:
  ids: [dada]
  tier: 1
agent:
  connect_attempts: 1
  connect_backoff_ms: 0
  io_timeout_ms: 500
  response_timeout_ms: 1000
poll:
  stage_retry_budget: 3
"#,
    );
    yaml
}
