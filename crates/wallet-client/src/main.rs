//! Interactive wallet client.
//!
//! # Usage
//!
//! ```bash
//! # Local server on the default port
//! wallet
//!
//! # Remote server, single 4 KiB read per reply like older clients
//! wallet --server 10.0.0.5:8080 --single-read
//! ```
//!
//! Logs go to stderr so they never interleave with replies.

use std::{io, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wallet_client::{
    ResponseFraming, SessionConfig, TransportConfig, WalletClient,
    shell::Shell,
    transport::LEGACY_RESPONSE_BYTES,
};

/// Wallet client
#[derive(Parser, Debug)]
#[command(name = "wallet")]
#[command(about = "Interactive client for the wallet server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Connect timeout in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Read timeout in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "10000")]
    read_timeout_ms: u64,

    /// Write timeout in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "10000")]
    write_timeout_ms: u64,

    /// Largest accepted reply in bytes; a longer one drops the connection
    #[arg(long, default_value = "65536")]
    max_response_bytes: usize,

    /// Take whatever one read returns as the whole reply
    #[arg(long)]
    single_read: bool,

    /// Silence in milliseconds that ends a reply
    #[arg(long, default_value = "50")]
    drain_quiet_ms: u64,

    /// Per-transfer ceiling checked before sending
    #[arg(long, default_value = "1000")]
    transfer_limit: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let framing = if args.single_read {
        ResponseFraming::SingleRead
    } else {
        ResponseFraming::Drain { quiet: Duration::from_millis(args.drain_quiet_ms) }
    };

    let max_response_bytes = if args.single_read {
        args.max_response_bytes.min(LEGACY_RESPONSE_BYTES)
    } else {
        args.max_response_bytes
    };

    let transport = TransportConfig {
        address: args.server,
        connect_timeout: timeout(args.connect_timeout_ms),
        read_timeout: timeout(args.read_timeout_ms),
        write_timeout: timeout(args.write_timeout_ms),
        max_response_bytes,
        framing,
    };

    tracing::info!(address = %transport.address, ?framing, "starting wallet shell");

    let mut shell = Shell::new(WalletClient::new(transport, SessionConfig { transfer_limit: args.transfer_limit }));
    shell.run(io::stdin().lock(), io::stdout().lock())?;

    Ok(())
}
