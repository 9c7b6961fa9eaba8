//! Server mode: relay each message to every other participant

use std::collections::HashMap;

use chatwire_net::{Endpoint, Error, Event, Events, Network, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Accept clients on `port` and relay until the event queue closes or Ctrl+C
pub async fn serve(network: Network, events: Events, port: u16) -> Result<()> {
    let addr = network.wait_for_clients(port, true).await?;
    info!(addr = %addr, "Relay listening");

    tokio::select! {
        _ = Relay::default().run(events) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutting down relay");
        }
    }

    network.stop_waiting_for_clients();
    Ok(())
}

/// Relay messages queued per participant before new ones are dropped
const PEER_QUEUE: usize = 64;

/// A participant and the queue feeding its writer task
struct Peer {
    endpoint: Endpoint,
    outbox: mpsc::Sender<String>,
}

/// Connected participants, keyed by endpoint id
#[derive(Default)]
pub struct Relay {
    peers: HashMap<Uuid, Peer>,
}

impl Relay {
    pub async fn run(mut self, mut events: Events) {
        while let Some(event) = events.next_event().await {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Connected(endpoint) => {
                let notice = format!("{} joined", endpoint);
                let (outbox, rx) = mpsc::channel(PEER_QUEUE);
                tokio::spawn(writer_task(endpoint.clone(), rx));
                self.peers.insert(endpoint.id(), Peer { endpoint: endpoint.clone(), outbox });
                self.broadcast(&notice, Some(endpoint.id()));
            }
            Event::MessageArrived {
                endpoint, message, ..
            } => {
                let line = format!("{}: {}", endpoint, message);
                self.broadcast(&line, Some(endpoint.id()));
            }
            Event::Disconnected { endpoint, reason } => {
                // Dropping the peer closes its outbox and ends the writer task
                if self.peers.remove(&endpoint.id()).is_some() {
                    debug!(endpoint = %endpoint, reason = %reason, "Participant removed");
                    self.broadcast(&format!("{} left", endpoint), None);
                }
            }
            Event::ConnectFailed { .. } => {}
        }
    }

    /// Queue `text` for every participant except `except`
    fn broadcast(&self, text: &str, except: Option<Uuid>) {
        for (id, peer) in &self.peers {
            if except == Some(*id) {
                continue;
            }
            match peer.outbox.try_send(text.to_owned()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        peer = %peer.endpoint,
                        "Participant is not keeping up, message dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %peer.endpoint, "Writer already stopped");
                }
            }
        }
    }
}

/// Writes queued relay messages to one participant
async fn writer_task(endpoint: Endpoint, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        match endpoint.send(&text).await {
            Ok(()) => {}
            Err(Error::FramingViolation { .. }) => {
                warn!(peer = %endpoint, "Relay text contains the delimiter, skipped");
            }
            Err(e) => {
                debug!(peer = %endpoint, error = %e, "Failed to relay message");
                break;
            }
        }
    }
}
