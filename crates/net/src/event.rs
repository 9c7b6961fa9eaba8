//! Connection lifecycle events and their delivery
//!
//! Endpoint tasks publish into an unbounded queue so a slow subscriber never
//! stalls a receive loop. A single consumer drains the queue, either by
//! polling [`Events::next_event`] or by handing a [`Subscriber`] to
//! [`Events::dispatch_to`].

use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::Endpoint;

/// Why an endpoint left the connected state
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// The peer closed its side (zero-length read)
    RemoteClosed,
    /// `disconnect` was called locally
    Local,
    /// The receive loop hit an I/O fault
    ReadFailed(Arc<io::Error>),
    /// A send hit an I/O fault or timed out
    WriteFailed(Arc<io::Error>),
    /// The receive task ended abnormally
    TaskFailed(String),
}

impl DisconnectReason {
    /// Whether the connection ended without a fault
    pub fn is_orderly(&self) -> bool {
        matches!(self, DisconnectReason::RemoteClosed | DisconnectReason::Local)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::RemoteClosed => write!(f, "closed by remote"),
            DisconnectReason::Local => write!(f, "closed locally"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::WriteFailed(e) => write!(f, "write failed: {}", e),
            DisconnectReason::TaskFailed(e) => write!(f, "receive task failed: {}", e),
        }
    }
}

/// Event published by the transport
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection was established, outbound or accepted
    Connected(Endpoint),
    /// A complete message arrived on an endpoint
    MessageArrived {
        endpoint: Endpoint,
        message: String,
        received_at: DateTime<Utc>,
    },
    /// An endpoint was disconnected; fires exactly once per endpoint
    Disconnected {
        endpoint: Endpoint,
        reason: DisconnectReason,
    },
    /// An outbound connect attempt failed
    ConnectFailed { target: String, error: String },
}

/// Receives events from [`Events::dispatch_to`]
pub trait Subscriber {
    fn on_connection_established(&mut self, endpoint: &Endpoint);

    fn on_disconnected(&mut self, endpoint: &Endpoint, reason: &DisconnectReason);

    fn on_message_arrived(&mut self, endpoint: &Endpoint, message: &str);

    fn on_connect_failed(&mut self, _target: &str, _error: &str) {}
}

/// Publishing side, cloned into every endpoint and accept loop
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventDispatcher {
    /// Create a dispatcher and the queue it feeds
    pub fn new() -> (Self, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventDispatcher { tx }, Events { rx })
    }

    pub fn dispatch(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("No event consumer, dropping event");
        }
    }
}

/// Consuming side of the event queue
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    /// Get the next event, or `None` once every publisher is gone
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Deliver every event to `subscriber` until the queue closes
    pub async fn dispatch_to<S: Subscriber>(mut self, mut subscriber: S) -> S {
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Connected(endpoint) => subscriber.on_connection_established(&endpoint),
                Event::MessageArrived {
                    endpoint, message, ..
                } => subscriber.on_message_arrived(&endpoint, &message),
                Event::Disconnected { endpoint, reason } => {
                    subscriber.on_disconnected(&endpoint, &reason)
                }
                Event::ConnectFailed { target, error } => {
                    subscriber.on_connect_failed(&target, &error)
                }
            }
        }
        subscriber
    }
}
