#![forbid(unsafe_code)]
//! Wallet: key generation, balances and payments through a relay node

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokhn::consensus::unix_now;
use tokhn::crypto::Address;
use tokhn::params::Network;
use tokhn::token::Token;
use tokhn::wallet::{self, default_wallet_path, Wallet};

#[derive(Parser)]
#[command(author, version, about = "Manages a tokhn wallet", long_about = None)]
struct Cli {
    /// Wallet file
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,
    /// Network the command applies to
    #[arg(short = 'N', long, global = true, default_value = "tkhn")]
    network: Network,
    /// Relay node, `host:port`
    #[arg(short, long, global = true, default_value = "127.0.0.1:5000")]
    node: String,
    #[arg(long, global = true, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a new wallet file
    New {
        #[arg(long)]
        name: Option<String>,
        /// Replaces an existing wallet
        #[arg(long)]
        force: bool,
    },
    /// Shows the wallet address on the selected network
    Address,
    /// Lists unspent outputs and the balance
    Balance,
    /// Pays an address, returning change to the wallet
    Send {
        to: Address,
        /// Amount in tokens, e.g. `1.25`
        amount: Token,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let path = cli.wallet.clone().unwrap_or_else(default_wallet_path);

    match cli.command {
        Commands::New { name, force } => {
            if path.exists() && !force {
                eprintln!("{}", format!("❌ Wallet already exists at {}", path.display()).red());
                eprintln!("{}", "💡 Pass --force to replace it".yellow());
                return Err("wallet exists".into());
            }
            let wallet = Wallet::new(name)?;
            wallet.save(&path)?;
            println!("{} {}", "🔑 Wallet saved to".green().bold(), path.display());
            for network in Network::ALL {
                println!("   {:>5}  {}", network.name().cyan(), wallet.address(network)?);
            }
        }
        Commands::Address => {
            let wallet = load(&path)?;
            println!("{}", wallet.address(cli.network)?);
        }
        Commands::Balance => {
            let wallet = load(&path)?;
            let address = wallet.address(cli.network)?;
            let utxos = wallet::request_utxos(&cli.node, cli.network, address, cli.timeout).await?;

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Source tx").add_attribute(Attribute::Bold),
                    Cell::new("Output").add_attribute(Attribute::Bold),
                    Cell::new("Amount").add_attribute(Attribute::Bold),
                ]);
            for utxo in &utxos {
                table.add_row(vec![
                    Cell::new(utxo.source_tx_id.to_string()),
                    Cell::new(utxo.source_txo_index),
                    Cell::new(utxo.amount),
                ]);
            }
            println!("{}", table);
            println!(
                "{} {} {}",
                "💰 Balance:".bright_green().bold(),
                wallet::balance(&utxos),
                cli.network.name().to_uppercase()
            );
        }
        Commands::Send { to, amount } => {
            let wallet = load(&path)?;
            let address = wallet.address(cli.network)?;
            let utxos = wallet::request_utxos(&cli.node, cli.network, address, cli.timeout).await?;
            let tx = wallet.build_transaction(cli.network, &utxos, to, amount, unix_now())?;
            wallet::submit_transaction(&cli.node, cli.network, &tx, cli.timeout).await?;
            println!("{} {}", "📤 Sent transaction".green().bold(), tx.id);
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Wallet, Box<dyn std::error::Error>> {
    Wallet::load(path).map_err(|e| {
        eprintln!("{}", "❌ Wallet not found".red().bold());
        eprintln!("{}", "💡 Run 'tokhn-wallet new' to create a wallet".yellow());
        e.into()
    })
}
