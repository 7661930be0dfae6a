//! Wallet server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory ledger (lost on restart)
//! wallet-server --bind 0.0.0.0:8080
//!
//! # Durable ledger with two admins
//! wallet-server --db wallet.redb --admin admin --admin auditor
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wallet_server::{DriverConfig, Server, ServerRuntimeConfig};

/// Wallet protocol server
#[derive(Parser, Debug)]
#[command(name = "wallet-server")]
#[command(about = "Wallet protocol server over TCP")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// redb database file (omit to keep state in memory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Username granted the admin role at signup (repeatable)
    #[arg(long = "admin", default_values_t = [String::from("admin")])]
    admins: Vec<String>,

    /// Largest single transfer
    #[arg(long, default_value = "1000")]
    transfer_limit: f64,

    /// Balance of new accounts
    #[arg(long, default_value = "1000")]
    initial_balance: f64,

    /// PBKDF2 iterations for new passwords
    #[arg(long, default_value = "100000")]
    pbkdf2_iterations: u32,

    /// Longest accepted command line, in bytes
    #[arg(long, default_value = "1024")]
    max_command_bytes: usize,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Wallet server starting");
    tracing::info!("Binding to {}", args.bind);

    match &args.db {
        Some(path) => tracing::info!("Ledger database: {}", path.display()),
        None => tracing::warn!("No --db given - accounts and ledger live in memory only"),
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        database_path: args.db,
        driver: DriverConfig {
            transfer_limit: args.transfer_limit,
            initial_balance: args.initial_balance,
            admins: args.admins,
            max_command_bytes: args.max_command_bytes,
            pbkdf2_iterations: args.pbkdf2_iterations,
            max_connections: args.max_connections,
        },
    };

    let server = Server::bind(config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
