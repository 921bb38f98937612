//! mesh-chain node
//!
//! Starts a node and reads console commands from stdin.

use clap::Parser;
use mesh_chain::cli::{self, CliResult};
use mesh_chain::config::NodeConfig;
use mesh_chain::network::FrameMode;
use mesh_chain::node::Node;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "meshchain")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A minimal peer-to-peer proof-of-work node", long_about = None)]
struct Cli {
    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address this node is reachable at (detected when omitted)
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Comma-separated peers to connect to at start-up
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Leading zero bytes required of block hashes
    #[arg(long)]
    block_difficulty: Option<usize>,

    /// Leading zero bytes required of transaction hashes
    #[arg(long)]
    transaction_difficulty: Option<usize>,

    /// Treat each network read as one message instead of length-prefixing
    #[arg(long)]
    legacy_framing: bool,
}

impl Cli {
    fn into_config(self) -> CliResult<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        match self.address {
            Some(address) => config.address = address,
            None if self.config.is_none() => {
                if let Some(address) = cli::detect_local_ip() {
                    config.address = address;
                }
            }
            None => {}
        }
        if !self.peers.is_empty() {
            config.bootstrap_peers = self.peers;
        }
        if let Some(difficulty) = self.block_difficulty {
            config.params.block_difficulty = difficulty;
        }
        if let Some(difficulty) = self.transaction_difficulty {
            config.params.transaction_difficulty = difficulty;
        }
        if self.legacy_framing {
            config.framing = FrameMode::Legacy;
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config()?;
    log::info!(
        "Starting node on {} (block difficulty {}, transaction difficulty {})",
        config.listen_addr(),
        config.params.block_difficulty,
        config.params.transaction_difficulty
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let node = Node::start(config).await?;
        println!("Node {} ready. Type a message to send it as a transaction,", node.self_addr());
        println!("an IP address to connect to a peer, or /status.");

        cli::run_console(&node, BufReader::new(tokio::io::stdin())).await?;

        // Keep serving peers after stdin closes
        std::future::pending::<()>().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
