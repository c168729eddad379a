//! Janus gateway protocol messages
//!
//! Only the subset needed to drive the streaming plugin is modelled: session
//! and handle management, the `list` / `watch` / `start` / `pause` requests,
//! and the replies and events they produce.

use feedsnap_core::{FeedDescriptor, FeedId, FeedSnapError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Package name of the streaming plugin
pub const STREAMING_PLUGIN: &str = "janus.plugin.streaming";

/// WebSocket subprotocol spoken by the gateway
pub const JANUS_SUBPROTOCOL: &str = "janus-protocol";

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: JsepType,
    /// SDP body
    pub sdp: String,
}

impl Jsep {
    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Offer,
            sdp: sdp.into(),
        }
    }
}

/// JSEP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
}

/// Body of a streaming plugin message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum StreamingRequest {
    /// List available mountpoints
    List,
    /// Subscribe to a mountpoint; the gateway answers with an offer
    Watch {
        /// Mountpoint id
        id: FeedId,
    },
    /// Start (or resume) media, carrying the answer on first start
    Start,
    /// Pause media without tearing down the PeerConnection
    Pause,
    /// Stop media
    Stop,
}

impl StreamingRequest {
    /// Whether the gateway handles this request asynchronously (ack + event)
    pub fn is_async(&self) -> bool {
        !matches!(self, StreamingRequest::List)
    }
}

/// Requests sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum JanusRequest {
    /// Create a session
    Create {
        /// Transaction id
        transaction: String,
    },
    /// Attach a plugin handle to a session
    Attach {
        /// Session id
        session_id: u64,
        /// Plugin package name
        plugin: String,
        /// Transaction id
        transaction: String,
    },
    /// Send a message to a plugin handle
    Message {
        /// Session id
        session_id: u64,
        /// Handle id
        handle_id: u64,
        /// Transaction id
        transaction: String,
        /// Plugin request
        body: StreamingRequest,
        /// Optional session description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },
    /// Keep the session alive
    Keepalive {
        /// Session id
        session_id: u64,
        /// Transaction id
        transaction: String,
    },
    /// Detach a plugin handle
    Detach {
        /// Session id
        session_id: u64,
        /// Handle id
        handle_id: u64,
        /// Transaction id
        transaction: String,
    },
    /// Destroy the session
    Destroy {
        /// Session id
        session_id: u64,
        /// Transaction id
        transaction: String,
    },
}

impl JanusRequest {
    /// Transaction id of the request
    pub fn transaction(&self) -> &str {
        match self {
            JanusRequest::Create { transaction }
            | JanusRequest::Attach { transaction, .. }
            | JanusRequest::Message { transaction, .. }
            | JanusRequest::Keepalive { transaction, .. }
            | JanusRequest::Detach { transaction, .. }
            | JanusRequest::Destroy { transaction, .. } => transaction,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            JanusRequest::Create { .. } => "create",
            JanusRequest::Attach { .. } => "attach",
            JanusRequest::Message { .. } => "message",
            JanusRequest::Keepalive { .. } => "keepalive",
            JanusRequest::Detach { .. } => "detach",
            JanusRequest::Destroy { .. } => "destroy",
        }
    }

    /// Whether the gateway acks this request before replying with an event
    pub fn is_async(&self) -> bool {
        match self {
            JanusRequest::Message { body, .. } => body.is_async(),
            _ => false,
        }
    }
}

/// Kind of an incoming gateway message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JanusKind {
    /// Synchronous success reply
    Success,
    /// Error reply
    Error,
    /// Asynchronous request accepted
    Ack,
    /// Plugin event
    Event,
    /// PeerConnection is up
    Webrtcup,
    /// Media started or stopped flowing
    Media,
    /// PeerConnection closed
    Hangup,
    /// Network trouble on a PeerConnection
    Slowlink,
    /// Handle detached
    Detached,
    /// Session timed out on the gateway
    Timeout,
    /// Anything else
    #[serde(other)]
    Other,
}

/// Error object of an error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JanusErrorBody {
    /// Error code
    pub code: i64,
    /// Error reason
    #[serde(default)]
    pub reason: String,
}

/// Plugin-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    /// Plugin package name
    #[serde(default)]
    pub plugin: String,
    /// Plugin payload
    #[serde(default)]
    pub data: Value,
}

/// Any message received from the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JanusMessage {
    /// Message kind
    pub janus: JanusKind,
    /// Transaction the message answers, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Session the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    /// Handle that emitted the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<u64>,
    /// Core payload (e.g. the id of a created session or handle)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Plugin payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugindata: Option<PluginData>,
    /// Session description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Jsep>,
    /// Error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JanusErrorBody>,
    /// Hangup reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JanusMessage {
    /// Id carried by a `create` or `attach` success reply
    pub fn created_id(&self) -> Option<u64> {
        self.data.as_ref()?.get("id")?.as_u64()
    }

    /// Streaming plugin payload
    pub fn plugin_payload(&self) -> Option<&Value> {
        self.plugindata.as_ref().map(|plugin| &plugin.data)
    }

    /// Error reported inside the plugin payload
    pub fn plugin_error(&self) -> Option<(i64, String)> {
        let data = self.plugin_payload()?;
        let code = data.get("error_code")?.as_i64()?;
        let reason = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some((code, reason))
    }

    /// `result.status` of a streaming event
    pub fn streaming_status(&self) -> Option<&str> {
        self.plugin_payload()?.get("result")?.get("status")?.as_str()
    }

    /// Turn gateway and plugin errors into [`FeedSnapError::Signaling`]
    pub fn into_result(self) -> Result<Self, FeedSnapError> {
        if self.janus == JanusKind::Error {
            let (code, reason) = self
                .error
                .map(|e| (e.code, e.reason))
                .unwrap_or((0, "unknown gateway error".to_string()));
            return Err(FeedSnapError::Signaling { code, reason });
        }
        if let Some((code, reason)) = self.plugin_error() {
            return Err(FeedSnapError::Signaling { code, reason });
        }
        Ok(self)
    }

    /// Parse the mountpoint list from a `list` reply
    pub fn stream_list(&self) -> Result<Vec<StreamInfo>, FeedSnapError> {
        let list = self
            .plugin_payload()
            .and_then(|data| data.get("list"))
            .cloned()
            .ok_or_else(|| FeedSnapError::Signaling {
                code: 0,
                reason: "list reply carried no mountpoints".to_string(),
            })?;
        Ok(serde_json::from_value(list)?)
    }
}

/// A mountpoint entry of a `list` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Mountpoint id
    pub id: FeedId,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Metadata; the gateway publishes it as a string that usually holds JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StreamInfo {
    /// Convert into a registry descriptor, decoding string-encoded metadata
    pub fn into_descriptor(self) -> FeedDescriptor {
        let metadata = match self.metadata {
            Some(Value::String(raw)) => {
                serde_json::from_str(&raw).unwrap_or(Value::String(raw))
            }
            Some(other) => other,
            None => Value::Null,
        };
        FeedDescriptor::new(self.id, self.description).with_metadata(metadata)
    }
}
