#![forbid(unsafe_code)]
//! Tokhn relay node daemon

use clap::Parser;
use colored::*;
use std::path::PathBuf;
use tokhn::config::load_config;
use tokhn::node::Node;

#[derive(Parser)]
#[command(author, version, about = "Runs a tokhn relay node", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Overrides `network.listen_port`
    #[arg(long)]
    port: Option<u16>,
    /// Overrides `network.api_port`
    #[arg(long)]
    api_port: Option<u16>,
    /// Additional peer to dial, `host:port`; may repeat
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Keeps all chains in memory
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.port {
        config.network.listen_port = port;
    }
    if let Some(port) = cli.api_port {
        config.network.api_port = port;
    }
    config.network.peers.extend(cli.peers);
    if cli.in_memory {
        config.database.in_memory = true;
    }

    println!("{}", "🔗 tokhn relay node".bright_cyan().bold());
    println!(
        "   peers on :{}  api on :{}  networks {}",
        config.network.listen_port.to_string().green(),
        config.network.api_port.to_string().green(),
        config.network.networks.join(",").yellow()
    );

    let node = Node::init(config)?;
    node.start().await?;
    Ok(())
}
