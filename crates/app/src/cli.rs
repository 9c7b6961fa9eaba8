//! Command line arguments and configuration lookup

use std::path::PathBuf;

use chatwire_net::{NetConfig, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing::debug;

/// Chatwire terminal chat
#[derive(Parser, Debug)]
#[command(name = "chatwire")]
#[command(version)]
pub struct Args {
    /// Configuration file (defaults to chatwire.toml in the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on or connect to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Message delimiter character
    #[arg(short, long, global = true)]
    pub delimiter: Option<char>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept clients and relay their messages to each other
    Serve,
    /// Connect to a relay
    Connect {
        /// Server host name or address
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Name shown to other participants
        #[arg(short, long)]
        name: Option<String>,
    },
}

/// Load the config file if there is one, then apply command line overrides
pub fn resolve_config(args: &Args) -> Result<NetConfig> {
    let path = match &args.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|path| path.exists()),
    };

    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            NetConfig::load(&path)?
        }
        None => NetConfig::default(),
    };

    if let Some(delimiter) = args.delimiter {
        config.delimiter = delimiter;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "chatwire", "chatwire")
        .map(|dirs| dirs.config_dir().join("chatwire.toml"))
}
