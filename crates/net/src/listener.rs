//! Inbound connections (server role)
//!
//! The accept loop runs in its own task and stops when
//! [`Listener::stop_waiting_for_clients`] fires its shutdown signal. Endpoints
//! it already produced carry their own lifecycle and are not affected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NetConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::EventDispatcher;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY_MS: u64 = 100;

/// Handle to a running accept loop
#[derive(Debug)]
pub struct Listener {
    addr: SocketAddr,
    accepting: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Listen on `port` across all interfaces and start accepting.
    ///
    /// With `infinite` false the loop stops after one accepted connection.
    pub async fn wait_for_clients(
        port: u16,
        infinite: bool,
        config: Arc<NetConfig>,
        dispatcher: EventDispatcher,
    ) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { port, source })?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, infinite, "Waiting for clients");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accepting = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(accept_loop(
            listener,
            infinite,
            config,
            dispatcher,
            accepting.clone(),
            shutdown_rx,
        ));

        Ok(Listener {
            addr: bound_addr,
            accepting,
            shutdown_tx,
            task,
        })
    }

    /// Get the listener's bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting new connections; existing endpoints stay up
    pub fn stop_waiting_for_clients(&self) {
        let _ = self.shutdown_tx.send(());
        debug!(addr = %self.addr, "Stop requested");
    }

    /// Wait for the accept loop to exit and release the socket
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Accept task failed");
        }
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    infinite: bool,
    config: Arc<NetConfig>,
    dispatcher: EventDispatcher,
    accepting: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        register(stream, addr, &config, &dispatcher);
                        if !infinite {
                            debug!("Single accept requested, stopping");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => {
                                info!("Accept loop shutting down");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(ACCEPT_RETRY_DELAY_MS)) => {}
                        }
                    }
                }
            }
        }
    }

    accepting.store(false, Ordering::Release);
    drop(listener);
    info!("Stopped waiting for clients");
}

/// Wrap an accepted socket in an endpoint
fn register(stream: TcpStream, addr: SocketAddr, config: &NetConfig, dispatcher: &EventDispatcher) {
    if let Err(e) = Endpoint::establish(stream, None, config, dispatcher.clone()) {
        warn!(addr = %addr, error = %e, "Failed to set up accepted connection");
    }
}
