mod cmd;
mod locate;
mod output;

use clap::{Parser, Subcommand};
use cmd::topology::TopologySubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "daqfleet",
    about = "Start, stop and monitor the daemons of a data-acquisition fleet",
    version,
    propagate_version = true
)]
struct Cli {
    /// Topology file (default: nearest daqfleet.yaml, then /etc/daqfleet/topology.yaml)
    #[arg(long, global = true, env = "DAQFLEET_TOPOLOGY")]
    topology: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect and print the status of every host
    Status {
        /// Only show these hosts
        #[arg(long = "host", value_name = "HOST")]
        hosts: Vec<String>,
    },

    /// Bring the fleet up stage by stage, waiting for each stage to report running
    Start,

    /// Bring the fleet down stage by stage, in stop order
    Stop,

    /// Send one command to the fleet's agents
    Cmd {
        /// start, stop, status, init or destroy
        verb: String,
        /// Daemon name, all, pwcs, buffer_<id> or none
        #[arg(default_value = "none")]
        target: String,
        /// Target host (repeatable; default: the command's usual hosts)
        #[arg(long = "host", value_name = "HOST")]
        hosts: Vec<String>,
        /// Restrict to one process slot
        #[arg(long)]
        unit: Option<u32>,
        /// Extra arguments appended to the request line
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show or validate the topology
    Topology {
        #[command(subcommand)]
        subcommand: Option<TopologySubcommand>,
    },

    /// Run the status loop and serve the HTTP API
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "57080")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Start | Commands::Stop => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let path = locate::resolve_topology(cli.topology.as_deref());

    let result = match cli.command {
        Commands::Status { hosts } => cmd::status::run(&path, &hosts, cli.json),
        Commands::Start => cmd::run::run(&path, daqfleet_core::types::Direction::Start, cli.json),
        Commands::Stop => cmd::run::run(&path, daqfleet_core::types::Direction::Stop, cli.json),
        Commands::Cmd {
            verb,
            target,
            hosts,
            unit,
            args,
        } => cmd::command::run(
            &path,
            cmd::command::CommandArgs {
                verb,
                target,
                hosts,
                unit,
                args,
            },
            cli.json,
        ),
        Commands::Topology { subcommand } => cmd::topology::run(&path, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&path, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
