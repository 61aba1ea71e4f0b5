use daqfleet_core::Driver;
use std::path::Path;
use std::sync::Arc;

pub fn run(path: &Path, port: u16) -> anyhow::Result<()> {
    let topology = super::load_topology(path)?;
    let name = topology.name.clone();

    super::runtime()?.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();

        println!("daqfleet '{name}' → http://localhost:{actual_port}  (PID {})", std::process::id());

        daqfleet_server::serve_on(Arc::new(Driver::from_topology(topology)), listener).await
    })
}
