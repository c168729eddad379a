//! In-process gateway
//!
//! Speaks enough of the Janus streaming plugin to exercise a full session
//! without a network: `create`, `attach`, `list`, `watch` (with a canned
//! offer), `start`, `pause`, `stop`, `keepalive`, `detach` and `destroy`. Useful for
//! demo setups and for tests that need to script gateway misbehaviour.

use crate::protocol::{
    JanusRequest, Jsep, StreamInfo, StreamingRequest, STREAMING_PLUGIN,
};
use crate::transport::{SignalingConnector, SignalingLink};
use async_trait::async_trait;
use feedsnap_core::{FeedId, FeedSnapError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// SDP offered for every watch request
pub const LOOPBACK_OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=loopback\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\na=sendonly\r\n";

#[derive(Default)]
struct GatewayState {
    streams: Vec<StreamInfo>,
    unreachable: bool,
    refuse_attach: bool,
    failing_watch: HashSet<FeedId>,
    silent_watch: HashSet<FeedId>,
    hangup_on_start: HashSet<FeedId>,
    next_id: u64,
    watching: HashMap<FeedId, u64>,
    requests: Vec<String>,
    link: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// A scripted, in-process Janus gateway
#[derive(Clone, Default)]
pub struct LoopbackGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl std::fmt::Debug for LoopbackGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackGateway")
            .field("streams", &state.streams.len())
            .field("connected", &state.link.is_some())
            .finish()
    }
}

impl LoopbackGateway {
    /// Gateway exposing the given mountpoints
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        let gateway = Self::default();
        gateway.state.lock().streams = streams;
        gateway
    }

    /// Gateway exposing `ids` with `Camera <id>` descriptions
    pub fn with_cameras(ids: &[u64]) -> Self {
        Self::new(
            ids.iter()
                .map(|id| StreamInfo {
                    id: FeedId(*id),
                    description: format!("Camera {}", id),
                    metadata: None,
                })
                .collect(),
        )
    }

    /// Refuse every connection attempt
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Fail every `attach`
    pub fn refuse_attach(&self, refuse: bool) {
        self.state.lock().refuse_attach = refuse;
    }

    /// Answer `watch` for this feed with a plugin error
    pub fn fail_watch(&self, feed_id: FeedId) {
        self.state.lock().failing_watch.insert(feed_id);
    }

    /// Ack `watch` for this feed but never send an offer
    pub fn withhold_offer(&self, feed_id: FeedId) {
        self.state.lock().silent_watch.insert(feed_id);
    }

    /// Hang up this feed's PeerConnection right after acking its `start`
    pub fn hangup_after_start(&self, feed_id: FeedId) {
        self.state.lock().hangup_on_start.insert(feed_id);
    }

    /// Replace the mountpoint list
    pub fn set_streams(&self, streams: Vec<StreamInfo>) {
        self.state.lock().streams = streams;
    }

    /// Kinds of requests received so far, e.g. `"create"`, `"message:watch"`
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Hang up the PeerConnection of a watched feed
    pub fn hangup(&self, feed_id: FeedId) -> bool {
        let state = self.state.lock();
        match (state.watching.get(&feed_id), state.link.as_ref()) {
            (Some(handle_id), Some(link)) => link
                .send(
                    json!({ "janus": "hangup", "sender": handle_id, "reason": "loopback hangup" })
                        .to_string(),
                )
                .is_ok(),
            _ => false,
        }
    }

    /// Drop the current connection from the gateway side
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.link = None;
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    fn allocate_id(state: &mut GatewayState) -> u64 {
        state.next_id += 1;
        state.next_id * 1000 + 7
    }

    fn handle(state: &mut GatewayState, request: JanusRequest) -> Vec<Value> {
        let transaction = request.transaction().to_string();
        match request {
            JanusRequest::Create { .. } => {
                state.requests.push("create".to_string());
                let id = Self::allocate_id(state);
                vec![json!({ "janus": "success", "transaction": transaction, "data": { "id": id } })]
            }
            JanusRequest::Attach { plugin, .. } => {
                state.requests.push("attach".to_string());
                if state.refuse_attach || plugin != STREAMING_PLUGIN {
                    return vec![json!({
                        "janus": "error",
                        "transaction": transaction,
                        "error": { "code": 460, "reason": format!("No such plugin '{}'", plugin) }
                    })];
                }
                let id = Self::allocate_id(state);
                vec![json!({ "janus": "success", "transaction": transaction, "data": { "id": id } })]
            }
            JanusRequest::Message {
                handle_id, body, ..
            } => Self::handle_message(state, transaction, handle_id, body),
            JanusRequest::Keepalive { .. } => {
                state.requests.push("keepalive".to_string());
                vec![json!({ "janus": "ack", "transaction": transaction })]
            }
            JanusRequest::Detach { handle_id, .. } => {
                state.requests.push("detach".to_string());
                state.watching.retain(|_, handle| *handle != handle_id);
                vec![json!({ "janus": "success", "transaction": transaction })]
            }
            JanusRequest::Destroy { .. } => {
                state.requests.push("destroy".to_string());
                state.watching.clear();
                vec![json!({ "janus": "success", "transaction": transaction })]
            }
        }
    }

    fn handle_message(
        state: &mut GatewayState,
        transaction: String,
        handle_id: u64,
        body: StreamingRequest,
    ) -> Vec<Value> {
        let ack = json!({ "janus": "ack", "transaction": transaction });
        let event = |data: Value, jsep: Option<Jsep>| {
            let mut event = json!({
                "janus": "event",
                "sender": handle_id,
                "transaction": transaction,
                "plugindata": { "plugin": STREAMING_PLUGIN, "data": data }
            });
            if let Some(jsep) = jsep {
                event["jsep"] = json!(jsep);
            }
            event
        };

        match body {
            StreamingRequest::List => {
                state.requests.push("message:list".to_string());
                vec![json!({
                    "janus": "success",
                    "transaction": transaction,
                    "sender": handle_id,
                    "plugindata": {
                        "plugin": STREAMING_PLUGIN,
                        "data": { "streaming": "list", "list": state.streams }
                    }
                })]
            }
            StreamingRequest::Watch { id } => {
                state.requests.push("message:watch".to_string());
                if state.failing_watch.contains(&id) {
                    return vec![
                        ack,
                        event(json!({ "error_code": 455, "error": format!("No such mountpoint ({})", id) }), None),
                    ];
                }
                if state.silent_watch.contains(&id) {
                    return vec![ack];
                }
                state.watching.insert(id, handle_id);
                vec![
                    ack,
                    event(
                        json!({ "streaming": "event", "result": { "status": "preparing" } }),
                        Some(Jsep::offer(LOOPBACK_OFFER_SDP)),
                    ),
                ]
            }
            StreamingRequest::Start => {
                state.requests.push("message:start".to_string());
                let hangup = state
                    .watching
                    .iter()
                    .any(|(id, handle)| *handle == handle_id && state.hangup_on_start.contains(id));
                let mut replies = vec![
                    ack,
                    event(json!({ "streaming": "event", "result": { "status": "starting" } }), None),
                ];
                if hangup {
                    replies.push(
                        json!({ "janus": "hangup", "sender": handle_id, "reason": "loopback hangup" }),
                    );
                }
                replies
            }
            StreamingRequest::Pause => {
                state.requests.push("message:pause".to_string());
                vec![
                    ack,
                    event(json!({ "streaming": "event", "result": { "status": "pausing" } }), None),
                ]
            }
            StreamingRequest::Stop => {
                state.requests.push("message:stop".to_string());
                state.watching.retain(|_, handle| *handle != handle_id);
                vec![
                    ack,
                    event(json!({ "streaming": "event", "result": { "status": "stopping" } }), None),
                ]
            }
        }
    }
}

#[async_trait]
impl SignalingConnector for LoopbackGateway {
    async fn open(&self, address: &str) -> Result<SignalingLink> {
        if self.state.lock().unreachable {
            return Err(FeedSnapError::SignalingUnavailable {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (client, mut peer) = SignalingLink::pair();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.link = Some(peer.outgoing.clone());
            state.shutdown = Some(shutdown_tx);
        }

        let state = self.state.clone();
        let outgoing = peer.outgoing;
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    text = peer.incoming.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                };
                let request = match serde_json::from_str::<JanusRequest>(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!("Loopback gateway ignored malformed request: {}", e);
                        continue;
                    }
                };

                let replies = Self::handle(&mut state.lock(), request);
                for reply in replies {
                    if outgoing.send(reply.to_string()).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(client)
    }
}
