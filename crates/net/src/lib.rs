//! Chatwire Network Library
//!
//! Delimiter-framed text messaging over TCP, in either the client or the
//! server role.
//!
//! # Architecture
//!
//! - **Connector**: opens one outbound connection
//! - **Listener**: accepts inbound connections until stopped
//! - **Endpoint**: one connection; a receive task frames incoming bytes, sends are serialized
//! - **Events**: `Connected`, `MessageArrived`, `Disconnected` and `ConnectFailed`,
//!   queued for a single consumer
//!
//! # Usage
//!
//! ```ignore
//! let (network, mut events) = Network::new(NetConfig::default())?;
//! network.wait_for_clients(11000, true).await?;
//!
//! while let Some(event) = events.next_event().await {
//!     match event {
//!         Event::MessageArrived { endpoint, message, .. } => {
//!             endpoint.send(&message).await?;
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod event;
mod frame;
pub mod listener;
pub mod network;

pub use config::NetConfig;
pub use connector::Connector;
pub use endpoint::{ConnectionState, Endpoint};
pub use error::{Error, Result};
pub use event::{DisconnectReason, Event, EventDispatcher, Events, Subscriber};
pub use listener::Listener;
pub use network::Network;

/// Default port for chat servers
pub const DEFAULT_PORT: u16 = 11000;
