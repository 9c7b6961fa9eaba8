//! One established TCP connection
//!
//! An [`Endpoint`] is a cheap cloneable handle. Its receive loop runs in its
//! own task and owns the read half and the frame accumulator; sends share the
//! write half through a mutex so frames from concurrent callers never
//! interleave. Teardown happens once, whichever of remote close, read fault,
//! write fault or local `disconnect` gets there first.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::NetConfig;
use crate::error::{Error, Result};
use crate::event::{DisconnectReason, Event, EventDispatcher};
use crate::frame::{encode_frame, write_frame, FrameDecoder};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Handle to one live (or formerly live) connection
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    identity: RwLock<String>,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    delimiter: char,
    write_timeout: Option<Duration>,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    /// Stops this endpoint's receive loop and pending sends; unrelated to any listener shutdown
    cancel_tx: broadcast::Sender<()>,
    dispatcher: EventDispatcher,
}

impl Endpoint {
    /// Wrap a freshly connected stream, publish `Connected`, then start receiving.
    ///
    /// `Connected` is queued before the receive loop exists, so it always
    /// precedes this endpoint's first `MessageArrived`.
    pub(crate) fn establish(
        stream: TcpStream,
        identity: Option<String>,
        config: &NetConfig,
        dispatcher: EventDispatcher,
    ) -> io::Result<Endpoint> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        let (reader, writer) = stream.into_split();
        let (cancel_tx, cancel_rx) = broadcast::channel(1);

        let endpoint = Endpoint {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                identity: RwLock::new(identity.unwrap_or_else(|| remote_addr.to_string())),
                remote_addr,
                local_addr,
                delimiter: config.delimiter,
                write_timeout: config.write_timeout(),
                state: Mutex::new(ConnectionState::Connecting),
                writer: tokio::sync::Mutex::new(Some(writer)),
                cancel_tx,
                dispatcher,
            }),
        };

        {
            let mut state = endpoint.inner.state.lock();
            *state = ConnectionState::Connected;
            endpoint
                .inner
                .dispatcher
                .dispatch(Event::Connected(endpoint.clone()));
        }
        info!(endpoint = %endpoint, addr = %remote_addr, "Connection established");

        let decoder = FrameDecoder::new(config.delimiter, config.max_pending_bytes);
        spawn_receive_loop(
            endpoint.clone(),
            reader,
            cancel_rx,
            decoder,
            config.read_buffer_size,
        );

        Ok(endpoint)
    }

    /// Unique handle id, stable for the endpoint's lifetime
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Display name; defaults to the remote address
    pub fn identity(&self) -> String {
        self.inner.identity.read().clone()
    }

    pub fn set_identity(&self, identity: impl Into<String>) {
        *self.inner.identity.write() = identity.into();
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn delimiter(&self) -> char {
        self.inner.delimiter
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send one message.
    ///
    /// Payloads containing the delimiter are rejected before anything is
    /// written. A write fault disconnects the endpoint and is returned here.
    /// A disconnect while the write is pending aborts it with `NotConnected`.
    pub async fn send(&self, payload: &str) -> Result<()> {
        let frame = encode_frame(payload, self.inner.delimiter)?;

        // Subscribe before checking state so a concurrent close is never missed
        let mut cancel_rx = self.inner.cancel_tx.subscribe();
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let result = {
            let mut guard = self.inner.writer.lock().await;
            let writer = guard.as_mut().ok_or(Error::NotConnected)?;
            // close() flips the state before it takes the writer
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }

            let write = async {
                match self.inner.write_timeout {
                    Some(limit) => tokio::time::timeout(limit, write_frame(writer, &frame))
                        .await
                        .unwrap_or_else(|_| {
                            Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
                        }),
                    None => write_frame(writer, &frame).await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel_rx.recv() => {
                    debug!(endpoint = %self, "Send aborted by disconnect");
                    return Err(Error::NotConnected);
                }

                result = write => result,
            }
        };

        match result {
            Ok(()) => {
                trace!(endpoint = %self, len = frame.len(), "Message sent");
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self, error = %e, "Send failed");
                let (reason, error) = send_failure(e);
                self.close(reason).await;
                Err(error)
            }
        }
    }

    /// Close the connection. Only the first call has any effect.
    pub async fn disconnect(&self) {
        if !self.close(DisconnectReason::Local).await {
            debug!(endpoint = %self, "Already disconnected");
        }
    }

    /// Transition to `Disconnected`, returning false if already there
    pub(crate) async fn close(&self, reason: DisconnectReason) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Disconnected;

            // Wake the receive loop; it may already be gone
            let _ = self.inner.cancel_tx.send(());

            if reason.is_orderly() {
                info!(endpoint = %self, reason = %reason, "Disconnected");
            } else {
                warn!(endpoint = %self, reason = %reason, "Disconnected");
            }
            self.inner.dispatcher.dispatch(Event::Disconnected {
                endpoint: self.clone(),
                reason,
            });
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(endpoint = %self, error = %e, "Socket shutdown failed");
            }
        }
        true
    }

    /// Publish decoded frames unless the endpoint has already disconnected
    fn deliver(&self, frames: Vec<String>) {
        if frames.is_empty() {
            return;
        }

        let state = self.inner.state.lock();
        if *state != ConnectionState::Connected {
            debug!(endpoint = %self, dropped = frames.len(), "Dropping frames after disconnect");
            return;
        }

        let received_at = Utc::now();
        for message in frames {
            self.inner.dispatcher.dispatch(Event::MessageArrived {
                endpoint: self.clone(),
                message,
                received_at,
            });
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.identity.read())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.inner.id)
            .field("identity", &*self.inner.identity.read())
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// Map a write fault to the disconnect cause and the error returned to the sender
fn send_failure(e: io::Error) -> (DisconnectReason, Error) {
    let timed_out = e.kind() == io::ErrorKind::TimedOut;
    let e = Arc::new(e);
    let error = if timed_out {
        Error::SendTimedOut
    } else {
        Error::SendFailed(e.clone())
    };
    (DisconnectReason::WriteFailed(e), error)
}

/// Run the receive loop under a supervisor that turns a panic into a disconnect
fn spawn_receive_loop(
    endpoint: Endpoint,
    reader: OwnedReadHalf,
    cancel_rx: broadcast::Receiver<()>,
    decoder: FrameDecoder,
    buffer_size: usize,
) {
    let supervised = endpoint.clone();
    let handle = tokio::spawn(receive_loop(
        endpoint,
        reader,
        cancel_rx,
        decoder,
        buffer_size,
    ));

    tokio::spawn(async move {
        if let Err(e) = handle.await {
            error!(endpoint = %supervised, error = %e, "Receive task failed");
            supervised
                .close(DisconnectReason::TaskFailed(e.to_string()))
                .await;
        }
    });
}

/// Receive loop - reads chunks, frames them, publishes messages
async fn receive_loop(
    endpoint: Endpoint,
    mut reader: OwnedReadHalf,
    mut cancel_rx: broadcast::Receiver<()>,
    mut decoder: FrameDecoder,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel_rx.recv() => {
                debug!(endpoint = %endpoint, "Receive loop cancelled");
                return;
            }

            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        if decoder.pending() > 0 {
                            debug!(
                                endpoint = %endpoint,
                                pending = decoder.pending(),
                                "Discarding undelimited bytes at close"
                            );
                        }
                        break DisconnectReason::RemoteClosed;
                    }
                    Ok(n) => match decoder.decode(&buf[..n]) {
                        Ok(frames) => endpoint.deliver(frames),
                        Err(e) => break DisconnectReason::ReadFailed(Arc::new(e)),
                    },
                    Err(e) => break DisconnectReason::ReadFailed(Arc::new(e)),
                }
            }
        }
    };

    endpoint.close(reason).await;
}
