//! # FeedSnap Signaling
//!
//! Janus gateway plumbing for FeedSnap. Opens a signaling session over
//! WebSocket, discovers the streaming plugin's mountpoints and negotiates one
//! subscription per feed, recording every state change in the shared
//! [`feedsnap_core::FeedRegistry`].

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod loopback;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export main types
pub use client::JanusClient;
pub use loopback::LoopbackGateway;
pub use protocol::{
    JanusKind, JanusMessage, JanusRequest, Jsep, JsepType, StreamInfo, StreamingRequest,
    JANUS_SUBPROTOCOL, STREAMING_PLUGIN,
};
pub use session::{MediaAnswer, MediaNegotiator, SessionManager, SessionManagerConfig};
pub use transport::{SignalingConnector, SignalingLink, WebSocketConnector};

#[cfg(test)]
mod tests {
    use super::*;
    use feedsnap_core::{FeedId, FeedSnapError};
    use serde_json::json;

    #[test]
    fn test_watch_message_wire_format() {
        let request = JanusRequest::Message {
            session_id: 1,
            handle_id: 2,
            transaction: "t1".to_string(),
            body: StreamingRequest::Watch { id: FeedId(3) },
            jsep: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "janus": "message",
                "session_id": 1,
                "handle_id": 2,
                "transaction": "t1",
                "body": { "request": "watch", "id": 3 }
            })
        );
        assert!(request.is_async());
        assert_eq!(request.kind(), "message");
    }

    #[test]
    fn test_start_carries_answer() {
        let request = JanusRequest::Message {
            session_id: 1,
            handle_id: 2,
            transaction: "t2".to_string(),
            body: StreamingRequest::Start,
            jsep: Some(Jsep::answer("v=0")),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["body"], json!({ "request": "start" }));
        assert_eq!(value["jsep"], json!({ "type": "answer", "sdp": "v=0" }));
    }

    #[test]
    fn test_list_is_synchronous() {
        assert!(!StreamingRequest::List.is_async());
        let create = JanusRequest::Create {
            transaction: "t".to_string(),
        };
        assert!(!create.is_async());
        assert_eq!(serde_json::to_value(&create).unwrap(), json!({ "janus": "create", "transaction": "t" }));
    }

    #[test]
    fn test_unknown_message_kind_parses() {
        let message: JanusMessage =
            serde_json::from_str(r#"{"janus":"trickle","sender":5}"#).unwrap();
        assert_eq!(message.janus, JanusKind::Other);
        assert_eq!(message.sender, Some(5));
    }

    #[test]
    fn test_gateway_error_becomes_signaling_error() {
        let message: JanusMessage = serde_json::from_value(json!({
            "janus": "error",
            "transaction": "t",
            "error": { "code": 458, "reason": "No such session" }
        }))
        .unwrap();

        match message.into_result() {
            Err(FeedSnapError::Signaling { code, reason }) => {
                assert_eq!(code, 458);
                assert_eq!(reason, "No such session");
            }
            other => panic!("expected signaling error, got {:?}", other),
        }
    }

    #[test]
    fn test_plugin_error_becomes_signaling_error() {
        let message: JanusMessage = serde_json::from_value(json!({
            "janus": "event",
            "sender": 9,
            "plugindata": {
                "plugin": STREAMING_PLUGIN,
                "data": { "streaming": "event", "error_code": 455, "error": "No such mountpoint" }
            }
        }))
        .unwrap();

        assert_eq!(message.plugin_error(), Some((455, "No such mountpoint".to_string())));
        assert!(message.into_result().is_err());
    }

    #[test]
    fn test_stream_list_decodes_string_metadata() {
        let message: JanusMessage = serde_json::from_value(json!({
            "janus": "success",
            "transaction": "t",
            "plugindata": {
                "plugin": STREAMING_PLUGIN,
                "data": {
                    "streaming": "list",
                    "list": [
                        { "id": 1, "description": "Front", "metadata": "{\"fisheye\":true}" },
                        { "id": 2, "description": "Rear", "metadata": "not json" },
                        { "id": 3 }
                    ]
                }
            }
        }))
        .unwrap();

        let descriptors: Vec<_> = message
            .stream_list()
            .unwrap()
            .into_iter()
            .map(StreamInfo::into_descriptor)
            .collect();

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].description, "Front");
        assert!(descriptors[0].fisheye().is_some());
        assert_eq!(descriptors[1].metadata, json!("not json"));
        assert_eq!(descriptors[2].label(), "Camera 3");
    }

    #[test]
    fn test_list_reply_without_list_is_an_error() {
        let message: JanusMessage =
            serde_json::from_value(json!({ "janus": "success", "transaction": "t" })).unwrap();
        assert!(message.stream_list().is_err());
    }
}
