//! Network error types

use std::io;
use std::sync::Arc;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Connecting to {target} timed out")]
    ConnectTimedOut { target: String },

    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Already waiting for clients")]
    AlreadyListening,

    #[error("Not connected")]
    NotConnected,

    #[error("Payload contains the message delimiter {delimiter:?}")]
    FramingViolation { delimiter: char },

    #[error("Send failed: {0}")]
    SendFailed(#[source] Arc<io::Error>),

    #[error("Send timed out")]
    SendTimedOut,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
