//! Signaling transport
//!
//! A transport turns an address into a pair of text channels. The production
//! transport is a WebSocket speaking the `janus-protocol` subprotocol; the
//! loopback gateway plugs in through the same trait.

use crate::protocol::JANUS_SUBPROTOCOL;
use async_trait::async_trait;
use feedsnap_core::{FeedSnapError, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Bidirectional text link to the signaling peer
///
/// Dropping `outgoing` closes the link; `incoming` yields `None` once the peer
/// goes away.
#[derive(Debug)]
pub struct SignalingLink {
    /// Frames to the peer
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Frames from the peer
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl SignalingLink {
    /// Create a connected pair of links, useful for in-process peers
    pub fn pair() -> (SignalingLink, SignalingLink) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            SignalingLink {
                outgoing: a_tx,
                incoming: b_rx,
            },
            SignalingLink {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

/// Opens signaling links
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Connect to `address`
    ///
    /// Fails with [`FeedSnapError::SignalingUnavailable`] when the peer cannot
    /// be reached.
    async fn open(&self, address: &str) -> Result<SignalingLink>;
}

/// WebSocket transport
///
/// Offers the `janus-protocol` subprotocol unless built with
/// [`WebSocketConnector::plain`].
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    subprotocol: Option<&'static str>,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    /// Connector for a Janus gateway
    pub fn new() -> Self {
        Self {
            subprotocol: Some(JANUS_SUBPROTOCOL),
        }
    }

    /// Connector that negotiates no subprotocol
    pub fn plain() -> Self {
        Self { subprotocol: None }
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn open(&self, address: &str) -> Result<SignalingLink> {
        let unavailable = |reason: String| FeedSnapError::SignalingUnavailable {
            address: address.to_string(),
            reason,
        };

        let mut request = address
            .into_client_request()
            .map_err(|e| unavailable(e.to_string()))?;
        if let Some(subprotocol) = self.subprotocol {
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(subprotocol));
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        tracing::info!("Connected to {}", address);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("Failed to send frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let peer = address.to_string();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::debug!("{} closed the connection", peer);
                        break;
                    }
                    Ok(_) => {
                        // Ignore other message types (Binary, Ping, Pong)
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error from {}: {}", peer, e);
                        break;
                    }
                }
            }
        });

        Ok(SignalingLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_is_crossed() {
        let (mut client, mut peer) = SignalingLink::pair();
        client.outgoing.send("ping".to_string()).unwrap();
        assert_eq!(peer.incoming.recv().await.unwrap(), "ping");

        peer.outgoing.send("pong".to_string()).unwrap();
        assert_eq!(client.incoming.recv().await.unwrap(), "pong");

        drop(peer);
        assert!(client.incoming.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_signaling_unavailable() {
        // Nothing listens on port 1 on the loopback interface
        let err = WebSocketConnector::new()
            .open("ws://127.0.0.1:1/janus")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SIGNALING_UNAVAILABLE");
    }
}
