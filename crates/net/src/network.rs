//! Client and server roles behind one handle
//!
//! A [`Network`] owns the configuration and the publishing side of the event
//! queue. It connects out, and it runs at most one listener at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::NetConfig;
use crate::connector::Connector;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, Events};
use crate::listener::Listener;

/// Network handle
pub struct Network {
    config: Arc<NetConfig>,
    dispatcher: EventDispatcher,
    listener: Mutex<Option<Listener>>,
}

impl Network {
    /// Create a handle and the event queue every endpoint it creates reports to
    pub fn new(config: NetConfig) -> Result<(Self, Events)> {
        config.validate()?;
        let (dispatcher, events) = EventDispatcher::new();
        let network = Network {
            config: Arc::new(config),
            dispatcher,
            listener: Mutex::new(None),
        };
        Ok((network, events))
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Connector sharing this handle's configuration and events
    pub fn connector(&self) -> Connector {
        Connector::new(self.config.clone(), self.dispatcher.clone())
    }

    /// Open an outbound connection
    pub async fn connect(&self, host: &str, port: u16) -> Result<Endpoint> {
        self.connector().connect(host, port).await
    }

    /// Start accepting inbound connections on `port` (0 picks a free port)
    pub async fn wait_for_clients(&self, port: u16, infinite: bool) -> Result<SocketAddr> {
        if self.is_accepting() {
            return Err(Error::AlreadyListening);
        }

        let listener =
            Listener::wait_for_clients(port, infinite, self.config.clone(), self.dispatcher.clone())
                .await?;
        let addr = listener.local_addr();

        let mut slot = self.listener.lock();
        if slot.as_ref().is_some_and(Listener::is_accepting) {
            // Lost a race with a concurrent call
            listener.stop_waiting_for_clients();
            return Err(Error::AlreadyListening);
        }
        *slot = Some(listener);
        Ok(addr)
    }

    /// Stop the active listener, if any. Established endpoints are untouched.
    pub fn stop_waiting_for_clients(&self) {
        match self.listener.lock().take() {
            Some(listener) => listener.stop_waiting_for_clients(),
            None => debug!("Not waiting for clients"),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(Listener::is_accepting)
    }

    /// Address of the active listener
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(Listener::local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DisconnectReason, Event};
    use std::collections::HashMap;
    use std::time::Duration;

    fn network() -> (Network, Events) {
        Network::new(NetConfig::default()).unwrap()
    }

    async fn next(events: &mut Events) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("event queue closed")
    }

    #[tokio::test]
    async fn test_send_yields_one_message() {
        let (server, mut server_events) = network();
        let (client, mut client_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let endpoint = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(matches!(next(&mut client_events).await, Event::Connected(_)));
        assert!(matches!(next(&mut server_events).await, Event::Connected(_)));

        for payload in ["hello", "", "ünïcødé ✓", "tabs\tand spaces "] {
            endpoint.send(payload).await.unwrap();
            match next(&mut server_events).await {
                Event::MessageArrived { message, .. } => assert_eq!(message, payload),
                other => panic!("Expected MessageArrived, got {:?}", other),
            }
        }
        server.stop_waiting_for_clients();
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let (server, mut server_events) = network();
        let (client, _client_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let endpoint = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(matches!(next(&mut server_events).await, Event::Connected(_)));

        for i in 0..200 {
            endpoint.send(&format!("msg-{}", i)).await.unwrap();
        }
        for i in 0..200 {
            match next(&mut server_events).await {
                Event::MessageArrived { message, .. } => assert_eq!(message, format!("msg-{}", i)),
                other => panic!("Expected MessageArrived, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (server, mut server_events) = network();
        let (client, _client_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let endpoint = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(matches!(next(&mut server_events).await, Event::Connected(_)));

        let payload = "x".repeat(64 * 1024);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let endpoint = endpoint.clone();
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move { endpoint.send(&payload).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for _ in 0..8 {
            match next(&mut server_events).await {
                Event::MessageArrived { message, .. } => assert_eq!(message.len(), payload.len()),
                other => panic!("Expected MessageArrived, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_remote_disconnect_reported_once() {
        let (server, mut server_events) = network();
        let (client, mut client_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let endpoint = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(matches!(next(&mut client_events).await, Event::Connected(_)));
        let accepted = match next(&mut server_events).await {
            Event::Connected(endpoint) => endpoint,
            other => panic!("Expected Connected, got {:?}", other),
        };

        accepted.disconnect().await;
        match next(&mut client_events).await {
            Event::Disconnected { endpoint: ep, reason } => {
                assert_eq!(ep, endpoint);
                assert!(matches!(reason, DisconnectReason::RemoteClosed));
            }
            other => panic!("Expected Disconnected, got {:?}", other),
        }

        endpoint.disconnect().await;
        let extra = tokio::time::timeout(Duration::from_millis(100), client_events.next_event()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_stop_prevents_new_connections() {
        let (server, mut server_events) = network();
        let (client, mut client_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let first = client.connect("127.0.0.1", addr.port()).await.unwrap();
        let accepted = match next(&mut server_events).await {
            Event::Connected(endpoint) => endpoint,
            other => panic!("Expected Connected, got {:?}", other),
        };
        assert!(matches!(next(&mut client_events).await, Event::Connected(_)));

        server.stop_waiting_for_clients();
        assert!(server.listen_addr().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(client.connect("127.0.0.1", addr.port()).await.is_err());
        assert!(matches!(
            next(&mut client_events).await,
            Event::ConnectFailed { .. }
        ));

        first.send("ping").await.unwrap();
        match next(&mut server_events).await {
            Event::MessageArrived { endpoint, message, .. } => {
                assert_eq!(endpoint, accepted);
                assert_eq!(message, "ping");
            }
            other => panic!("Expected MessageArrived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_already_listening() {
        let (server, _events) = network();
        server.wait_for_clients(0, true).await.unwrap();
        assert!(matches!(
            server.wait_for_clients(0, true).await,
            Err(Error::AlreadyListening)
        ));

        server.stop_waiting_for_clients();
        server.wait_for_clients(0, true).await.unwrap();
        assert!(server.is_accepting());
    }

    #[tokio::test]
    async fn test_per_endpoint_order_across_clients() {
        let (server, mut server_events) = network();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let (client_a, _a_events) = network();
        let (client_b, _b_events) = network();
        let a = client_a.connect("127.0.0.1", addr.port()).await.unwrap();
        let b = client_b.connect("127.0.0.1", addr.port()).await.unwrap();

        let mut by_peer: HashMap<SocketAddr, Vec<String>> = HashMap::new();
        let mut connected = 0;
        for i in 0..20 {
            a.send(&format!("a{}", i)).await.unwrap();
            b.send(&format!("b{}", i)).await.unwrap();
        }
        while by_peer.values().map(Vec::len).sum::<usize>() < 40 {
            match next(&mut server_events).await {
                Event::Connected(_) => connected += 1,
                Event::MessageArrived { endpoint, message, .. } => {
                    by_peer.entry(endpoint.remote_addr()).or_default().push(message)
                }
                other => panic!("Unexpected event {:?}", other),
            }
        }

        assert_eq!(connected, 2);
        let expected_a: Vec<String> = (0..20).map(|i| format!("a{}", i)).collect();
        let expected_b: Vec<String> = (0..20).map(|i| format!("b{}", i)).collect();
        assert_eq!(by_peer[&a.local_addr()], expected_a);
        assert_eq!(by_peer[&b.local_addr()], expected_b);
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let config = NetConfig::builder().delimiter('|').build().unwrap();
        let (server, mut server_events) = Network::new(config.clone()).unwrap();
        let (client, _client_events) = Network::new(config).unwrap();
        let addr = server.wait_for_clients(0, true).await.unwrap();

        let endpoint = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(matches!(next(&mut server_events).await, Event::Connected(_)));

        assert!(matches!(
            endpoint.send("a|b").await,
            Err(Error::FramingViolation { delimiter: '|' })
        ));
        endpoint.send("line one\nline two").await.unwrap();
        match next(&mut server_events).await {
            Event::MessageArrived { message, .. } => assert_eq!(message, "line one\nline two"),
            other => panic!("Expected MessageArrived, got {:?}", other),
        }
    }
}
