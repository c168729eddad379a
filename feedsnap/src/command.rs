//! Command channel messages
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound frames are parsed into [`Command`]; every command is answered with
//! exactly one [`CommandResponse`].

use feedsnap_core::{FeedId, FeedSnapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A feed id exactly as the caller spelled it
///
/// Callers send ids as numbers or strings; responses echo the same spelling
/// so the caller can match them up. Any other JSON value is kept verbatim and
/// names no feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedKey {
    /// Numeric id
    Number(u64),
    /// String id, e.g. `"2"`
    Text(String),
    /// Anything else, e.g. `-1`, `2.5` or `null`
    Other(Value),
}

impl FeedKey {
    /// The registry id this key names, if it names one
    pub fn feed_id(&self) -> Option<FeedId> {
        match self {
            FeedKey::Number(id) => Some(FeedId(*id)),
            FeedKey::Text(text) => text.trim().parse().ok().map(FeedId),
            FeedKey::Other(_) => None,
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKey::Number(id) => write!(f, "{}", id),
            FeedKey::Text(text) => f.write_str(text),
            FeedKey::Other(value) => write!(f, "{}", value),
        }
    }
}

impl From<FeedId> for FeedKey {
    fn from(id: FeedId) -> Self {
        FeedKey::Number(id.get())
    }
}

/// Inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Capture one feed
    TakeSnapshot {
        /// Feed to capture
        id: FeedKey,
    },
    /// Capture every active feed
    TakeAllSnapshot,
    /// Capture the configured stereo pair
    TakeStereoSnapshot,
    /// Capture an explicit list of feeds
    TakeMultipleSnapshot {
        /// Feeds to capture, in response order
        ids: Vec<FeedKey>,
    },
    /// Include or exclude a feed from capture
    ToggleCamera {
        /// Feed to toggle
        id: FeedKey,
        /// New enable flag
        enabled: bool,
    },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct SinglePayload {
    id: FeedKey,
}

#[derive(Deserialize)]
struct MultiplePayload {
    ids: Vec<FeedKey>,
}

#[derive(Deserialize)]
struct TogglePayload {
    id: FeedKey,
    enabled: bool,
}

impl Command {
    /// Event name on the wire
    pub fn event(&self) -> &'static str {
        match self {
            Command::TakeSnapshot { .. } => "take_snapshot",
            Command::TakeAllSnapshot => "take_all_snapshot",
            Command::TakeStereoSnapshot => "take_stereo_snapshot",
            Command::TakeMultipleSnapshot { .. } => "take_multiple_snapshot",
            Command::ToggleCamera { .. } => "toggle_camera",
        }
    }

    /// Parse an inbound frame
    ///
    /// Batch commands accept any payload, including none at all. Unknown
    /// events and malformed payloads fail with
    /// [`FeedSnapError::CommandChannel`].
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text).map_err(|e| malformed(text, e))?;
        let payload = envelope.data;

        let command = match envelope.event.as_str() {
            "take_snapshot" => {
                let SinglePayload { id } =
                    serde_json::from_value(payload).map_err(|e| malformed(text, e))?;
                Command::TakeSnapshot { id }
            }
            "take_all_snapshot" => Command::TakeAllSnapshot,
            "take_stereo_snapshot" => Command::TakeStereoSnapshot,
            "take_multiple_snapshot" => {
                let MultiplePayload { ids } =
                    serde_json::from_value(payload).map_err(|e| malformed(text, e))?;
                Command::TakeMultipleSnapshot { ids }
            }
            "toggle_camera" => {
                let TogglePayload { id, enabled } =
                    serde_json::from_value(payload).map_err(|e| malformed(text, e))?;
                Command::ToggleCamera { id, enabled }
            }
            other => {
                return Err(FeedSnapError::CommandChannel {
                    reason: format!("unknown event '{}'", other),
                })
            }
        };
        Ok(command)
    }
}

fn malformed(text: &str, error: serde_json::Error) -> FeedSnapError {
    FeedSnapError::CommandChannel {
        reason: format!("malformed command {}: {}", text, error),
    }
}

/// One feed inside a batch response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Feed id as requested
    pub id: FeedKey,
    /// Data URL, or `null` when the capture failed
    pub image: Option<String>,
    /// Display label of the feed
    pub camera: String,
}

/// Outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CommandResponse {
    /// Answer to `take_snapshot`
    SnapshotResponse {
        /// Feed id as requested
        id: FeedKey,
        /// Data URL, or `null` when the capture failed
        image: Option<String>,
    },
    /// Answer to `take_all_snapshot`
    SnapshotsAllResponse {
        /// One entry per active feed
        data: Vec<BatchEntry>,
    },
    /// Answer to `take_stereo_snapshot`
    SnapshotsStereoResponse {
        /// Left then right
        data: Vec<BatchEntry>,
    },
    /// Answer to `take_multiple_snapshot`
    SnapshotsMultipleResponse {
        /// One entry per requested id, in request order
        data: Vec<BatchEntry>,
    },
    /// Answer to `toggle_camera`
    CameraToggled {
        /// Feed id as requested
        id: FeedKey,
        /// Requested flag
        enabled: bool,
        /// Whether the feed was known and updated
        success: bool,
    },
}

impl CommandResponse {
    /// Serialize to a text frame
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_take_snapshot_keeps_id_spelling() {
        let numeric = Command::parse(r#"{"event":"take_snapshot","data":{"id":2}}"#).unwrap();
        assert_eq!(numeric, Command::TakeSnapshot { id: FeedKey::Number(2) });

        let text = Command::parse(r#"{"event":"take_snapshot","data":{"id":"2"}}"#).unwrap();
        assert_eq!(
            text,
            Command::TakeSnapshot {
                id: FeedKey::Text("2".to_string())
            }
        );
        assert_eq!(FeedKey::Text("2".to_string()).feed_id(), Some(FeedId(2)));
        assert_eq!(FeedKey::Text("front".to_string()).feed_id(), None);
    }

    #[test]
    fn test_odd_ids_are_kept_verbatim() {
        for (frame, id) in [
            (r#"{"event":"take_snapshot","data":{"id":-1}}"#, json!(-1)),
            (r#"{"event":"take_snapshot","data":{"id":2.5}}"#, json!(2.5)),
            (r#"{"event":"take_snapshot","data":{"id":null}}"#, Value::Null),
        ] {
            let Command::TakeSnapshot { id: key } = Command::parse(frame).unwrap() else {
                panic!("{} did not parse as take_snapshot", frame);
            };
            assert_eq!(key, FeedKey::Other(id.clone()));
            assert_eq!(key.feed_id(), None);
            assert_eq!(serde_json::to_value(&key).unwrap(), id);
        }
    }

    #[test]
    fn test_batch_commands_ignore_payload() {
        for frame in [
            r#"{"event":"take_all_snapshot"}"#,
            r#"{"event":"take_all_snapshot","data":{}}"#,
            r#"{"event":"take_all_snapshot","data":null}"#,
        ] {
            assert_eq!(Command::parse(frame).unwrap(), Command::TakeAllSnapshot);
        }
        assert_eq!(
            Command::parse(r#"{"event":"take_stereo_snapshot","data":{}}"#).unwrap(),
            Command::TakeStereoSnapshot
        );
    }

    #[test]
    fn test_parse_multiple_and_toggle() {
        let multiple =
            Command::parse(r#"{"event":"take_multiple_snapshot","data":{"ids":[1,"3"]}}"#).unwrap();
        assert_eq!(
            multiple,
            Command::TakeMultipleSnapshot {
                ids: vec![FeedKey::Number(1), FeedKey::Text("3".to_string())]
            }
        );

        let toggle =
            Command::parse(r#"{"event":"toggle_camera","data":{"id":3,"enabled":false}}"#).unwrap();
        assert_eq!(
            toggle,
            Command::ToggleCamera {
                id: FeedKey::Number(3),
                enabled: false
            }
        );
        assert_eq!(toggle.event(), "toggle_camera");
    }

    #[test]
    fn test_unknown_and_malformed_are_rejected() {
        for frame in [
            r#"{"event":"reboot","data":{}}"#,
            r#"{"event":"take_snapshot","data":{}}"#,
            r#"{"event":"toggle_camera","data":{"id":1}}"#,
            r#"{"data":{"id":1}}"#,
            "not json",
        ] {
            let err = Command::parse(frame).unwrap_err();
            assert_eq!(err.error_code(), "COMMAND_CHANNEL_ERROR", "{}", frame);
        }
    }

    #[test]
    fn test_response_wire_format() {
        let single = CommandResponse::SnapshotResponse {
            id: FeedKey::Text("2".to_string()),
            image: None,
        };
        assert_eq!(
            serde_json::from_str::<Value>(&single.to_frame().unwrap()).unwrap(),
            json!({ "event": "snapshot_response", "data": { "id": "2", "image": null } })
        );

        let batch = CommandResponse::SnapshotsStereoResponse {
            data: vec![BatchEntry {
                id: FeedKey::Number(1),
                image: Some("data:image/jpeg;base64,AA==".to_string()),
                camera: "Camera 1".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({
                "event": "snapshots_stereo_response",
                "data": { "data": [{ "id": 1, "image": "data:image/jpeg;base64,AA==", "camera": "Camera 1" }] }
            })
        );

        let toggled = CommandResponse::CameraToggled {
            id: FeedKey::Number(3),
            enabled: false,
            success: true,
        };
        assert_eq!(
            serde_json::to_value(&toggled).unwrap(),
            json!({ "event": "camera_toggled", "data": { "id": 3, "enabled": false, "success": true } })
        );
    }
}
