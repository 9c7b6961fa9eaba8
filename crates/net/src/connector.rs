//! Outbound connections (client role)

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::NetConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};

/// Opens outbound connections sharing one configuration and dispatcher
#[derive(Debug, Clone)]
pub struct Connector {
    config: Arc<NetConfig>,
    dispatcher: EventDispatcher,
    identity: Option<String>,
}

impl Connector {
    pub fn new(config: Arc<NetConfig>, dispatcher: EventDispatcher) -> Self {
        Self {
            config,
            dispatcher,
            identity: None,
        }
    }

    /// Identity given to endpoints instead of their remote address
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Connect to `host:port`.
    ///
    /// Failures are returned and also published as [`Event::ConnectFailed`];
    /// no `Connected` event is published for them.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Endpoint> {
        let target = format!("{}:{}", host, port);
        info!(target = %target, "Connecting");

        match self.open(host, port, &target).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                warn!(target = %target, error = %e, "Connect failed");
                self.dispatcher.dispatch(Event::ConnectFailed {
                    target,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn open(&self, host: &str, port: u16, target: &str) -> Result<Endpoint> {
        let attempt = TcpStream::connect((host, port));
        let stream = match self.config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| Error::ConnectTimedOut {
                    target: target.to_string(),
                })?,
            None => attempt.await,
        }
        .map_err(|source| Error::ConnectFailed {
            target: target.to_string(),
            source,
        })?;

        Endpoint::establish(
            stream,
            self.identity.clone(),
            &self.config,
            self.dispatcher.clone(),
        )
        .map_err(|source| Error::ConnectFailed {
            target: target.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Events;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn connector() -> (Connector, Events) {
        let (dispatcher, events) = EventDispatcher::new();
        (
            Connector::new(Arc::new(NetConfig::default()), dispatcher),
            events,
        )
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (connector, mut events) = connector();

        let endpoint = connector.connect("127.0.0.1", port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        assert!(matches!(events.next_event().await, Some(Event::Connected(_))));
        assert_eq!(endpoint.identity(), format!("127.0.0.1:{}", port));

        endpoint.send("hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[tokio::test]
    async fn test_preset_identity_kept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (connector, _events) = connector();

        let endpoint = connector
            .with_identity("alice")
            .connect("127.0.0.1", port)
            .await
            .unwrap();
        assert_eq!(endpoint.identity(), "alice");
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // A listener that never accepts stops answering SYNs once its queue is full
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(0).unwrap();
        let port = listener.local_addr().unwrap().port();

        let (dispatcher, mut events) = EventDispatcher::new();
        let config = NetConfig::builder().connect_timeout_ms(200).build().unwrap();
        let connector = Connector::new(Arc::new(config), dispatcher);

        let mut established = Vec::new();
        let mut timed_out = None;
        for _ in 0..8 {
            match connector.connect("127.0.0.1", port).await {
                Ok(endpoint) => established.push(endpoint),
                Err(e) => {
                    timed_out = Some(e);
                    break;
                }
            }
        }
        assert!(
            matches!(timed_out, Some(Error::ConnectTimedOut { .. })),
            "got {:?}",
            timed_out
        );

        loop {
            match events.next_event().await {
                Some(Event::Connected(_)) => continue,
                Some(Event::ConnectFailed { target, error }) => {
                    assert_eq!(target, format!("127.0.0.1:{}", port));
                    assert!(error.contains("timed out"), "got {:?}", error);
                    break;
                }
                other => panic!("Expected ConnectFailed, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Reserve a port, then free it so nothing is listening there
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (connector, mut events) = connector();

        let result = connector.connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(Error::ConnectFailed { .. })));

        match events.next_event().await {
            Some(Event::ConnectFailed { target, .. }) => {
                assert_eq!(target, format!("127.0.0.1:{}", port))
            }
            other => panic!("Expected ConnectFailed, got {:?}", other),
        }
    }
}
