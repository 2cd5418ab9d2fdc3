use crate::config::peer_port;
use crate::consensus::{Message, NodeSnapshot, PeerId, PeerStatus, Transport};
use crate::error::TransportError;
use crate::orchestrator::PeerControl;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const USER_AGENT: &str = "rust-ben-or/0.1.0";

/// Base URLs of every peer, indexed by peer id.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    client: Client,
    urls: Vec<String>,
}

impl PeerDirectory {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(PeerDirectory { client, urls })
    }

    /// Peer `i` at `http://{host}:{base_port + i}`.
    pub fn localhost(host: &str, base_port: u16, peers: usize, timeout: Duration) -> Result<Self, TransportError> {
        let urls = (0..peers)
            .map(|peer| {
                peer_port(base_port, peer)
                    .map(|port| format!("http://{}:{}", host, port))
                    .ok_or(TransportError::PortOutOfRange { peer, base_port })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(urls, timeout).map_err(TransportError::Client)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    fn url(&self, peer: PeerId, path: &str) -> Result<String, TransportError> {
        self.urls
            .get(peer)
            .map(|base| format!("{}{}", base, path))
            .ok_or(TransportError::UnknownPeer(peer))
    }

    async fn get(&self, peer: PeerId, path: &str) -> Result<reqwest::Response, TransportError> {
        let url = self.url(peer, path)?;
        self.client
            .get(url)
            .send()
            .await
            .map_err(|source| TransportError::Http { peer, source })
    }
}

fn expect_success(peer: PeerId, response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(TransportError::Rejected {
            peer,
            status: response.status().as_u16(),
        })
    }
}

/// Posts protocol messages to `/message`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    peers: PeerDirectory,
}

impl HttpTransport {
    pub fn new(peers: PeerDirectory) -> Self {
        HttpTransport { peers }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, target: PeerId, message: Message) -> Result<(), TransportError> {
        let url = self.peers.url(target, "/message")?;
        let response = self
            .peers
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .map_err(|source| TransportError::Http { peer: target, source })?;
        expect_success(target, response).map(|_| ())
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Lifecycle and introspection endpoints of remote peers.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    peers: PeerDirectory,
}

impl HttpPeerClient {
    pub fn new(peers: PeerDirectory) -> Self {
        HttpPeerClient { peers }
    }
}

#[async_trait]
impl PeerControl for HttpPeerClient {
    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn probe_status(&self, peer: PeerId) -> Result<PeerStatus, TransportError> {
        let response = self.peers.get(peer, "/status").await?;
        match response.status() {
            StatusCode::OK => Ok(PeerStatus::Live),
            StatusCode::INTERNAL_SERVER_ERROR => Ok(PeerStatus::Faulty),
            other => Err(TransportError::Rejected {
                peer,
                status: other.as_u16(),
            }),
        }
    }

    async fn start(&self, peer: PeerId) -> Result<(), TransportError> {
        let response = self.peers.get(peer, "/start").await?;
        expect_success(peer, response).map(|_| ())
    }

    async fn stop(&self, peer: PeerId) -> Result<(), TransportError> {
        let response = self.peers.get(peer, "/stop").await?;
        expect_success(peer, response).map(|_| ())
    }

    async fn get_state(&self, peer: PeerId) -> Result<NodeSnapshot, TransportError> {
        let response = expect_success(peer, self.peers.get(peer, "/getState").await?)?;
        response
            .json::<NodeSnapshot>()
            .await
            .map_err(|source| TransportError::Http { peer, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_directory() {
        let peers = PeerDirectory::localhost("127.0.0.1", 3000, 3, Duration::from_secs(1)).unwrap();

        assert_eq!(peers.len(), 3);
        assert_eq!(peers.url(2, "/status").unwrap(), "http://127.0.0.1:3002/status");
        assert!(matches!(
            peers.url(3, "/status"),
            Err(TransportError::UnknownPeer(3))
        ));

        assert!(matches!(
            PeerDirectory::localhost("127.0.0.1", 65534, 3, Duration::from_secs(1)),
            Err(TransportError::PortOutOfRange { peer: 2, base_port: 65534 })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_a_delivery_error() {
        // port 9 (discard) is not served
        let peers = PeerDirectory::new(
            vec!["http://127.0.0.1:9".to_string()],
            Duration::from_millis(500),
        )
        .unwrap();
        let transport = HttpTransport::new(peers);

        let result = transport.deliver(0, Message::propose(1, crate::consensus::Value::One)).await;
        assert!(matches!(result, Err(TransportError::Http { peer: 0, .. })));
    }
}
