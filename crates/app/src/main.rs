//! Chatwire - terminal chat over delimiter-framed TCP
//!
//! `chatwire serve` relays every message to the other connected clients.
//! `chatwire connect` joins a relay, sending stdin lines and printing arrivals.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod chat;
mod cli;
mod relay;

use chatwire_net::Network;
use cli::{Args, Command};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match cli::resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (network, events) = match Network::new(config) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let port = network.config().port;
    let result = match args.command {
        Command::Serve => relay::serve(network, events, port).await,
        Command::Connect { host, name } => chat::run(network, events, &host, port, name).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
