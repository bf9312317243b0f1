use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scs_maze_runtime::config::{DEFAULT_BAUD, DEFAULT_PORT, RuntimeConfig};
use scs_maze_runtime::link::{MonotonicClock, SerialLink};
use scs_maze_runtime::nodes::{self, Role};
use scs_maze_runtime::runtime::{self, ManualCommand, Runtime};

/// Run one node of the maze robot on a serial link
#[derive(Parser, Debug)]
#[command(name = "scs-node", version)]
struct Args {
    /// Which node to run
    #[arg(long, value_enum)]
    node: Role,

    /// Serial port to the other nodes
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Optional uplink port (marked frames, navigation node only)
    #[arg(long)]
    uplink: Option<String>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reject out-of-order packets
    #[arg(long)]
    strict: bool,

    /// Wait for a manual 's' before each transmission
    #[arg(long)]
    manual: bool,
}

/// Forward console keys (t, p, s, ?, r) to the runtime
async fn console(tx: mpsc::UnboundedSender<ManualCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        for command in line.chars().filter_map(ManualCommand::from_key) {
            if tx.send(command).is_err() {
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    config.strict_sequence |= args.strict;
    if args.manual {
        config.auto_send = false;
    }
    info!("Config: {:?}", config);

    let link = SerialLink::open(&args.port, args.baud)?;
    let mut runtime = Runtime::new(
        nodes::build(args.node, &config),
        Box::new(link),
        Arc::new(MonotonicClock::new()),
        config.inter_byte_gap_ms,
    );
    if let Some(port) = &args.uplink {
        runtime = runtime.with_uplink(Box::new(SerialLink::open(port, args.baud)?));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(console(tx));
    runtime::run(runtime, rx).await
}
