#![forbid(unsafe_code)]
//! Mining client: mines on every network a relay node welcomes it on

use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tokhn::miner::client::MiningClient;
use tokhn::miner::default_workers;
use tokhn::wallet::{default_wallet_path, Wallet};
use tracing::warn;

#[derive(Parser)]
#[command(author, version, about = "Mines tokhn blocks against a relay node", long_about = None)]
struct Cli {
    /// Relay node, `host:port`
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    node: String,
    /// Wallet paid by mined blocks; created when missing
    #[arg(short, long)]
    wallet: Option<PathBuf>,
    /// Search threads, all cores by default
    #[arg(short, long)]
    threads: Option<usize>,
    /// Pause before reconnecting after the node goes away
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    retry: Duration,
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let path = cli.wallet.unwrap_or_else(default_wallet_path);
    let wallet = if path.exists() {
        Wallet::load(&path)?
    } else {
        let wallet = Wallet::new(Some("miner".to_string()))?;
        wallet.save(&path)?;
        println!("{} {}", "🔑 Created wallet".green(), path.display());
        wallet
    };

    let threads = cli.threads.unwrap_or_else(default_workers);
    println!(
        "{} {} with {} thread(s)",
        "⛏️  Mining against".bright_cyan().bold(),
        cli.node.yellow(),
        threads
    );

    let mut client = MiningClient::new(wallet.keypair()?, threads);
    loop {
        if let Err(e) = client.run(&cli.node, cli.connect_timeout).await {
            warn!("Mining session ended: {}", e);
        }
        println!(
            "{} retrying in {}",
            "🔌 Disconnected,".red(),
            humantime::format_duration(cli.retry)
        );
        tokio::time::sleep(cli.retry).await;
    }
}
