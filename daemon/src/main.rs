//! lanmesh daemon: entry point for running a node from the command line.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use lanmesh_network::ShutdownController;
use lanmesh_node::{init_logging, LanNode, NodeConfig, StartOptions};
use lanmesh_types::{Peer, PeerEvents, Producer};

#[derive(Parser)]
#[command(name = "lanmesh-daemon", about = "LAN peer discovery and messaging daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "LANMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Address advertised to peers ("ip" or "ip:port").
    #[arg(long, env = "LANMESH_LOCAL_ADDRESS")]
    local_address: Option<String>,

    /// TCP port for the message listener.
    #[arg(long, env = "LANMESH_MESSAGE_PORT")]
    message_port: Option<u16>,

    /// UDP port for discovery heartbeats.
    #[arg(long, env = "LANMESH_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Wire encoding: "native" or "text".
    #[arg(long, env = "LANMESH_ENCODING")]
    encoding: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "LANMESH_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "LANMESH_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run a node that broadcasts a small status payload and logs peer events.
    Run {
        /// Discover peers and listen, but never broadcast.
        #[arg(long)]
        quiet: bool,
    },
    /// Discover peers for a while, then run one throughput scan.
    Probe {
        /// Seconds to wait for peers before probing.
        #[arg(long, default_value_t = 3)]
        warmup_secs: u64,

        /// Probe this peer only.
        #[arg(long)]
        target: Option<String>,

        /// Sample payload size in bytes.
        #[arg(long, default_value_t = 256)]
        sample_size: usize,

        /// Accept a comparable earlier scan instead of probing.
        #[arg(long)]
        reuse_cache: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

/// Consumer that only logs.
struct LoggingEvents;

impl PeerEvents for LoggingEvents {
    fn on_new_peer(&self, peer: &Peer) {
        tracing::info!(peer = %peer, "peer joined");
    }

    fn on_peer_lost(&self, peer: &Peer) {
        tracing::info!(peer = %peer.address, "peer lost");
    }

    fn on_data(&self, source: &str, payload: Vec<u8>) {
        tracing::info!(peer = %source, payload = %String::from_utf8_lossy(&payload), "received");
    }
}

/// Producer of a numbered status line.
struct StatusProducer {
    address: String,
    seq: AtomicU64,
}

impl Producer for StatusProducer {
    fn produce(&self) -> Option<Vec<u8>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Some(format!("{} alive #{seq}", self.address).into_bytes())
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let base = match &cli.config {
        Some(path) => {
            let path = path.to_str().context("config path is not UTF-8")?;
            NodeConfig::from_toml_file(path).with_context(|| format!("loading {path}"))?
        }
        None => NodeConfig::default(),
    };

    let config = NodeConfig {
        local_address: cli.local_address.clone().or(base.local_address.clone()),
        message_port: cli.message_port.unwrap_or(base.message_port),
        discovery_port: cli.discovery_port.unwrap_or(base.discovery_port),
        encoding: cli.encoding.clone().unwrap_or_else(|| base.encoding.clone()),
        log_format: cli.log_format.clone().unwrap_or_else(|| base.log_format.clone()),
        log_level: cli.log_level.clone().unwrap_or_else(|| base.log_level.clone()),
        ..base
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string());
        return Ok(());
    }

    init_logging(config.log_format(), &config.log_level);

    match cli.command {
        Command::Run { quiet } => run(config, quiet).await,
        Command::Probe {
            warmup_secs,
            target,
            sample_size,
            reuse_cache,
        } => probe(config, warmup_secs, target, sample_size, reuse_cache).await,
        Command::Config => Ok(()),
    }
}

async fn run(config: NodeConfig, quiet: bool) -> anyhow::Result<()> {
    let serializer = text_serializer(&config);
    // The status line carries the advertised address.
    let address = lanmesh_node::resolve_local_address(&config)?;
    let producer: Arc<dyn Producer> = Arc::new(StatusProducer {
        address,
        seq: AtomicU64::new(0),
    });

    let node = LanNode::configure(config, Some(Arc::new(LoggingEvents)), Some(producer), serializer)?;
    node.start(StartOptions {
        broadcaster: !quiet,
        ..StartOptions::all()
    })
    .await?;
    tracing::info!(address = %node.local_address(), "lanmesh daemon running");

    let shutdown = ShutdownController::new();
    shutdown.wait_for_signal().await;

    tracing::info!("Shutdown signal received, stopping node");
    let stats = node.stats();
    tracing::info!(peers = stats.peers, pooled = stats.pooled_connections, "final stats");
    node.stop().await;
    tracing::info!("lanmesh daemon exited cleanly");
    Ok(())
}

async fn probe(
    config: NodeConfig,
    warmup_secs: u64,
    target: Option<String>,
    sample_size: usize,
    reuse_cache: bool,
) -> anyhow::Result<()> {
    let serializer = text_serializer(&config);
    let node = LanNode::configure(config, Some(Arc::new(LoggingEvents)), None, serializer)?;
    node.start(StartOptions {
        broadcaster: false,
        ..StartOptions::all()
    })
    .await?;

    tracing::info!(warmup_secs, "waiting for peers");
    tokio::time::sleep(Duration::from_secs(warmup_secs)).await;

    let sample = vec![0u8; sample_size];
    let ideal = node.ideal_rate(&sample);
    let measured = node.probe_rate(&sample, target.as_deref(), reuse_cache).await;
    let peers = node.stats().peers;
    node.stop().await;

    match ideal {
        Ok(mps) => println!("ideal:    {mps} msg/s"),
        Err(e) => println!("ideal:    unavailable ({e})"),
    }
    let measured = measured.context("probe scan failed")?;
    println!("measured: {measured} msg/s across {peers} peer(s)");
    Ok(())
}

fn text_serializer(config: &NodeConfig) -> Option<Arc<dyn lanmesh_protocol::TextSerializer>> {
    (config.encoding.eq_ignore_ascii_case("text"))
        .then(|| Arc::new(lanmesh_protocol::FieldTextSerializer) as Arc<dyn lanmesh_protocol::TextSerializer>)
}
