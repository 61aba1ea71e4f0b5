use crate::persist::ProcessProbe;
use crate::session::SessionPolicy;
use crate::topology::Topology;
use crate::types::{DaemonKind, DaemonSpec, Host, HostRole};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub(crate) fn quick_policy() -> SessionPolicy {
    SessionPolicy {
        connect_attempts: 1,
        connect_backoff: Duration::ZERO,
        io_timeout: Duration::from_millis(500),
        response_timeout: Duration::from_millis(500),
        max_response_lines: 32,
    }
}

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// In-process control agent: records every request line and answers with
/// whatever `respond` returns.
pub(crate) struct FakeAgent {
    pub port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::spawn_delayed(Duration::ZERO, respond).await
    }

    /// Like [`FakeAgent::spawn`], but every reply waits `delay` after the
    /// request has been recorded.
    pub async fn spawn_delayed<F>(delay: Duration, respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let log = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end().to_string();
                    log.lock().unwrap().push(line.clone());
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let reply = respond(&line);
                    let _ = writer.write_all(reply.as_bytes()).await;
                    let _ = writer.flush().await;
                });
            }
        });

        Self {
            port,
            requests,
            handle,
        }
    }

    pub fn host(&self, name: &str, role: HostRole) -> Host {
        Host::new(name, role).with_endpoint("127.0.0.1", self.port)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A host whose agent port refuses connections.
pub(crate) async fn closed_host(name: &str) -> Host {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Host::new(name, HostRole::Node).with_endpoint("127.0.0.1", port)
}

/// Process probe with a fixed answer.
pub(crate) struct FixedProbe(AtomicBool);

impl FixedProbe {
    pub fn new(running: bool) -> Self {
        Self(AtomicBool::new(running))
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::Relaxed);
    }
}

#[async_trait]
impl ProcessProbe for FixedProbe {
    async fn is_running(&self, _pattern: &str) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Server, two nodes (one with two units) and a helper; master control,
/// one per-unit write client, one ordinary and one persistent daemon.
pub(crate) fn fleet() -> Topology {
    let hosts = vec![
        Host::new("srv0", HostRole::Server),
        Host::new("node0", HostRole::Node).with_units([0, 1]),
        Host::new("node1", HostRole::Node),
        Host::new("help0", HostRole::Helper),
    ];
    let mut topo = Topology::new("fleet", hosts);

    let mut udpdb = DaemonSpec::new("udpdb", DaemonKind::WriteClient, &[HostRole::Node], 2);
    udpdb.per_unit = true;
    let mut tcs = DaemonSpec::new("tcs_interface", DaemonKind::Daemon, &[HostRole::Server], 3);
    tcs.persistent = true;

    topo.daemons = vec![
        DaemonSpec::new(
            "master_control",
            DaemonKind::MasterControl,
            &[HostRole::Server, HostRole::Node, HostRole::Helper],
            0,
        ),
        udpdb,
        DaemonSpec::new("results_manager", DaemonKind::Daemon, &[HostRole::Server], 3),
        tcs,
    ];
    topo.data_blocks.ids = vec!["dada".into()];
    topo.data_blocks.tier = 1;
    topo
}
