//! Client mode: send stdin lines, print whatever arrives

use std::sync::Arc;
use std::time::Duration;

use chatwire_net::{DisconnectReason, Endpoint, Error, Events, Network, Result, Subscriber};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};

/// How long to let the printer drain after disconnecting
const DRAIN_TIMEOUT_MS: u64 = 500;

/// Prints events to stdout and signals when the connection drops
pub struct Console {
    closed: Arc<Notify>,
}

impl Console {
    pub fn new(closed: Arc<Notify>) -> Self {
        Self { closed }
    }
}

impl Subscriber for Console {
    fn on_connection_established(&mut self, endpoint: &Endpoint) {
        println!("Connected to {}", endpoint.remote_addr());
    }

    fn on_disconnected(&mut self, _endpoint: &Endpoint, reason: &DisconnectReason) {
        println!("Disconnected ({})", reason);
        self.closed.notify_one();
    }

    fn on_message_arrived(&mut self, _endpoint: &Endpoint, message: &str) {
        println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
    }

    fn on_connect_failed(&mut self, target: &str, error: &str) {
        println!("Could not connect to {}: {}", target, error);
    }
}

/// Connect, then pump stdin into the connection until EOF, `/quit` or disconnect
pub async fn run(
    network: Network,
    events: Events,
    host: &str,
    port: u16,
    name: Option<String>,
) -> Result<()> {
    let closed = Arc::new(Notify::new());
    let printer = tokio::spawn(events.dispatch_to(Console::new(closed.clone())));

    let connector = match name {
        Some(name) => network.connector().with_identity(name),
        None => network.connector(),
    };
    let endpoint = connector.connect(host, port).await;
    drop(connector);
    drop(network);
    let endpoint = match endpoint {
        Ok(endpoint) => endpoint,
        Err(e) => {
            let _ = tokio::time::timeout(Duration::from_millis(DRAIN_TIMEOUT_MS), printer).await;
            return Err(e);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) => line,
                    None => break,
                };
                match endpoint.send(&line).await {
                    Ok(()) => {}
                    Err(Error::FramingViolation { delimiter }) => {
                        println!("Messages cannot contain {:?}", delimiter);
                    }
                    Err(e) => {
                        warn!(error = %e, "Send failed");
                        break;
                    }
                }
            }
            _ = closed.notified() => break,
        }
    }

    endpoint.disconnect().await;
    info!("Chat session ended");
    drop(endpoint);
    let _ = tokio::time::timeout(Duration::from_millis(DRAIN_TIMEOUT_MS), printer).await;
    Ok(())
}
