//! Janus request/response correlation
//!
//! Every request carries a fresh transaction id. The first reply carrying that
//! id resolves the request: `success`/`error` for synchronous requests, `ack`
//! for asynchronous ones. Plugin events that follow an ack are routed by their
//! `sender` handle to whichever task registered for that handle, so each feed's
//! negotiation reads its own ordered event stream.

use crate::protocol::{JanusKind, JanusMessage, JanusRequest, Jsep, StreamingRequest};
use crate::transport::SignalingLink;
use dashmap::DashMap;
use feedsnap_core::{FeedSnapError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Pending = Arc<DashMap<String, oneshot::Sender<JanusMessage>>>;
type HandleRoutes = Arc<DashMap<u64, mpsc::UnboundedSender<JanusMessage>>>;

/// Client side of one signaling connection
#[derive(Debug)]
pub struct JanusClient {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Pending,
    handles: HandleRoutes,
    closed: watch::Receiver<bool>,
    timeout: Duration,
    router: JoinHandle<()>,
}

impl JanusClient {
    /// Start routing messages arriving on `link`
    pub fn new(link: SignalingLink, timeout: Duration) -> Self {
        let pending: Pending = Arc::new(DashMap::new());
        let handles: HandleRoutes = Arc::new(DashMap::new());
        let (closed_tx, closed) = watch::channel(false);

        let router = tokio::spawn(Self::route(
            link.incoming,
            pending.clone(),
            handles.clone(),
            closed_tx,
        ));

        Self {
            outgoing: link.outgoing,
            pending,
            handles,
            closed,
            timeout,
            router,
        }
    }

    async fn route(
        mut incoming: mpsc::UnboundedReceiver<String>,
        pending: Pending,
        handles: HandleRoutes,
        closed_tx: watch::Sender<bool>,
    ) {
        while let Some(text) = incoming.recv().await {
            let message = match serde_json::from_str::<JanusMessage>(&text) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Invalid signaling message: {} ({})", e, text);
                    continue;
                }
            };

            if let Some(waiter) = message
                .transaction
                .as_deref()
                .and_then(|transaction| pending.remove(transaction))
                .map(|(_, waiter)| waiter)
            {
                let _ = waiter.send(message);
                continue;
            }

            match message.sender {
                Some(handle_id) => match handles.get(&handle_id) {
                    Some(route) => {
                        let _ = route.send(message);
                    }
                    None => {
                        tracing::debug!(
                            "Dropping {:?} for unrouted handle {}",
                            message.janus,
                            handle_id
                        );
                    }
                },
                None if message.janus == JanusKind::Timeout => {
                    tracing::warn!("Signaling session timed out on the gateway");
                }
                None => {
                    tracing::debug!("Ignoring unsolicited {:?}", message.janus);
                }
            }
        }

        tracing::info!("Signaling connection closed");
        // Dropping the waiters and routes wakes everyone blocked on them
        pending.clear();
        handles.clear();
        let _ = closed_tx.send(true);
    }

    /// Fresh transaction id
    pub fn new_transaction() -> String {
        Uuid::new_v4().to_string()
    }

    /// Whether the underlying link is gone
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.outgoing.is_closed()
    }

    /// Receiver that flips to `true` when the link goes away
    ///
    /// Reports an error instead once the client itself is dropped.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Send a request and wait for its first reply
    ///
    /// Error replies, including plugin-level errors, surface as
    /// [`FeedSnapError::Signaling`].
    pub async fn request(&self, request: JanusRequest) -> Result<JanusMessage> {
        if self.is_closed() {
            return Err(FeedSnapError::NotConnected);
        }

        let transaction = request.transaction().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(transaction.clone(), tx);

        let json = serde_json::to_string(&request)?;
        tracing::trace!("-> {}", json);
        if self.outgoing.send(json).is_err() {
            self.pending.remove(&transaction);
            return Err(FeedSnapError::NotConnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => {
                if request.is_async() && reply.janus == JanusKind::Event {
                    // The gateway skipped the ack; the event still belongs to its handle
                    if let Some(route) = reply.sender.and_then(|handle| self.handles.get(&handle)) {
                        let _ = route.send(reply.clone());
                    }
                }
                reply.into_result()
            }
            Ok(Err(_)) => Err(FeedSnapError::NotConnected),
            Err(_) => {
                self.pending.remove(&transaction);
                tracing::warn!("No reply to {} ({})", request.kind(), transaction);
                Err(FeedSnapError::TransactionTimeout {
                    transaction,
                    duration: self.timeout,
                })
            }
        }
    }

    /// Create a gateway session
    pub async fn create_session(&self) -> Result<u64> {
        let reply = self
            .request(JanusRequest::Create {
                transaction: Self::new_transaction(),
            })
            .await?;
        reply.created_id().ok_or_else(|| FeedSnapError::Signaling {
            code: 0,
            reason: "create reply carried no session id".to_string(),
        })
    }

    /// Attach a plugin handle
    pub async fn attach(&self, session_id: u64, plugin: &str) -> Result<u64> {
        let attach_failed = |reason: String| FeedSnapError::PluginAttach {
            plugin: plugin.to_string(),
            reason,
        };

        let reply = self
            .request(JanusRequest::Attach {
                session_id,
                plugin: plugin.to_string(),
                transaction: Self::new_transaction(),
            })
            .await
            .map_err(|e| attach_failed(e.to_string()))?;

        reply
            .created_id()
            .ok_or_else(|| attach_failed("attach reply carried no handle id".to_string()))
    }

    /// Send a plugin message on a handle
    pub async fn message(
        &self,
        session_id: u64,
        handle_id: u64,
        body: StreamingRequest,
        jsep: Option<Jsep>,
    ) -> Result<JanusMessage> {
        self.request(JanusRequest::Message {
            session_id,
            handle_id,
            transaction: Self::new_transaction(),
            body,
            jsep,
        })
        .await
    }

    /// Ping the gateway so the session does not expire
    pub async fn keepalive(&self, session_id: u64) -> Result<()> {
        self.request(JanusRequest::Keepalive {
            session_id,
            transaction: Self::new_transaction(),
        })
        .await
        .map(|_| ())
    }

    /// Detach a plugin handle and stop routing its events
    pub async fn detach(&self, session_id: u64, handle_id: u64) -> Result<()> {
        self.release_handle(handle_id);
        self.request(JanusRequest::Detach {
            session_id,
            handle_id,
            transaction: Self::new_transaction(),
        })
        .await
        .map(|_| ())
    }

    /// Destroy the gateway session
    pub async fn destroy(&self, session_id: u64) -> Result<()> {
        self.request(JanusRequest::Destroy {
            session_id,
            transaction: Self::new_transaction(),
        })
        .await
        .map(|_| ())
    }

    /// Route events emitted by `handle_id` to the returned receiver
    ///
    /// Register before sending the request whose events you expect, so nothing
    /// is dropped in between.
    pub fn handle_events(&self, handle_id: u64) -> mpsc::UnboundedReceiver<JanusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handles.insert(handle_id, tx);
        rx
    }

    /// Stop routing events for `handle_id`
    pub fn release_handle(&self, handle_id: u64) {
        self.handles.remove(&handle_id);
    }
}

impl Drop for JanusClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::STREAMING_PLUGIN;
    use serde_json::{json, Value};

    fn client_with_peer(timeout: Duration) -> (JanusClient, SignalingLink) {
        let (client_link, peer_link) = SignalingLink::pair();
        (JanusClient::new(client_link, timeout), peer_link)
    }

    async fn next_request(peer: &mut SignalingLink) -> Value {
        let text = peer.incoming.recv().await.unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn reply(peer: &SignalingLink, value: Value) {
        peer.outgoing.send(value.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_create_session_resolves_by_transaction() {
        let (client, mut peer) = client_with_peer(Duration::from_secs(5));

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            assert_eq!(request["janus"], "create");
            reply(
                &peer,
                json!({ "janus": "success", "transaction": request["transaction"], "data": { "id": 77 } }),
            );
            peer
        });

        assert_eq!(client.create_session().await.unwrap(), 77);
        drop(gateway.await.unwrap());
    }

    #[tokio::test]
    async fn test_attach_error_is_plugin_attach() {
        let (client, mut peer) = client_with_peer(Duration::from_secs(5));

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            assert_eq!(request["plugin"], STREAMING_PLUGIN);
            reply(
                &peer,
                json!({
                    "janus": "error",
                    "transaction": request["transaction"],
                    "error": { "code": 460, "reason": "No such plugin" }
                }),
            );
            peer
        });

        let err = client.attach(1, STREAMING_PLUGIN).await.unwrap_err();
        assert!(matches!(err, FeedSnapError::PluginAttach { .. }));
        drop(gateway.await.unwrap());
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (client, _peer) = client_with_peer(Duration::from_millis(50));
        let err = client.keepalive(1).await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSACTION_TIMEOUT");
    }

    #[tokio::test]
    async fn test_events_are_routed_by_sender() {
        let (client, peer) = client_with_peer(Duration::from_secs(5));
        let mut first = client.handle_events(10);
        let mut second = client.handle_events(20);

        reply(&peer, json!({ "janus": "event", "sender": 20, "plugindata": { "plugin": STREAMING_PLUGIN, "data": { "result": { "status": "started" } } } }));
        reply(&peer, json!({ "janus": "hangup", "sender": 10, "reason": "gone" }));

        assert_eq!(second.recv().await.unwrap().streaming_status(), Some("started"));
        assert_eq!(first.recv().await.unwrap().janus, JanusKind::Hangup);
    }

    #[tokio::test]
    async fn test_event_without_ack_reaches_the_handle() {
        let (client, mut peer) = client_with_peer(Duration::from_secs(5));
        let mut events = client.handle_events(5);

        let gateway = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            assert_eq!(request["body"]["request"], "watch");
            reply(
                &peer,
                json!({
                    "janus": "event",
                    "transaction": request["transaction"],
                    "sender": 5,
                    "plugindata": { "plugin": STREAMING_PLUGIN, "data": { "result": { "status": "preparing" } } },
                    "jsep": { "type": "offer", "sdp": "v=0" }
                }),
            );
            peer
        });

        client
            .message(1, 5, StreamingRequest::Watch { id: feedsnap_core::FeedId(3) }, None)
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.jsep, Some(Jsep::offer("v=0")));
        drop(gateway.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_link_fails_pending_requests() {
        let (client, mut peer) = client_with_peer(Duration::from_secs(5));

        let gateway = tokio::spawn(async move {
            let _ = next_request(&mut peer).await;
            drop(peer);
        });

        let err = client.create_session().await.unwrap_err();
        assert!(matches!(err, FeedSnapError::NotConnected));
        gateway.await.unwrap();
        client
            .closed_signal()
            .wait_for(|closed| *closed)
            .await
            .unwrap();
        assert!(client.is_closed());
    }
}
