//! fwprobe — distributed firewall and port-policy probe.
//!
//! Usage:
//!   fwprobe --server [--ports <RANGE>] [--sender-device <DEV> ...]
//!   fwprobe --address <COORDINATOR> --id <ID>

use clap::Parser;
use fwprobe::{client, server, Cli, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialise logging (RUST_LOG=debug etc.)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from(Cli::parse());

    let result = if config.server_mode {
        server::run_server(&config).await.map_err(|e| e.to_string())
    } else {
        client::run_client(&config).await.map_err(|e| e.to_string())
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
