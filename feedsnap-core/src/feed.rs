//! Feed identity, descriptors and the per-feed lifecycle table

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a feed, assigned by the signaling peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub u64);

impl FeedId {
    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FeedId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Fisheye correction parameters carried in feed metadata
///
/// The parameters are passed through untouched to whatever renders the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FisheyeCorrection {
    /// Correction parameters as published by the peer
    pub parameters: Map<String, Value>,
}

/// A video feed as reported by the signaling peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    /// Peer-assigned identifier
    pub id: FeedId,
    /// Human readable description
    pub description: String,
    /// Opaque metadata blob
    #[serde(default)]
    pub metadata: Value,
}

impl FeedDescriptor {
    /// Create a descriptor with no metadata
    pub fn new(id: impl Into<FeedId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            metadata: Value::Null,
        }
    }

    /// Attach metadata to the descriptor
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Label used for this feed in snapshot results
    pub fn label(&self) -> String {
        if self.description.trim().is_empty() {
            format!("Camera {}", self.id)
        } else {
            self.description.clone()
        }
    }

    /// Fisheye correction parameters, if the feed needs correction
    ///
    /// Accepts `"fisheye": true` or `"fisheye": { ... }`; an object with
    /// `"enabled": false` counts as no correction.
    pub fn fisheye(&self) -> Option<FisheyeCorrection> {
        match self.metadata.get("fisheye")? {
            Value::Bool(true) => Some(FisheyeCorrection::default()),
            Value::Object(params) => {
                if params.get("enabled") == Some(&Value::Bool(false)) {
                    return None;
                }
                let mut parameters = params.clone();
                parameters.remove("enabled");
                Some(FisheyeCorrection { parameters })
            }
            _ => None,
        }
    }
}

/// Subscription state of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// Known but not subscribed
    Idle,
    /// Watch request issued, offer/answer in flight
    Negotiating,
    /// Media is flowing
    Watching,
    /// Paused on the peer
    Disabled,
    /// Negotiation or transport failed; needs a fresh subscribe
    Failed,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedState::Idle => "idle",
            FeedState::Negotiating => "negotiating",
            FeedState::Watching => "watching",
            FeedState::Disabled => "disabled",
            FeedState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle events that drive [`FeedState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    /// A watch request was sent
    SubscribeIssued,
    /// The answer was accepted and media started
    NegotiationSucceeded,
    /// Explicit pause
    Paused,
    /// Explicit resume after a pause
    Resumed,
    /// Negotiation or transport error
    Error,
}

impl FeedEvent {
    /// State this event aims for, regardless of where the feed currently is
    pub fn target(self) -> FeedState {
        match self {
            FeedEvent::SubscribeIssued => FeedState::Negotiating,
            FeedEvent::NegotiationSucceeded | FeedEvent::Resumed => FeedState::Watching,
            FeedEvent::Paused => FeedState::Disabled,
            FeedEvent::Error => FeedState::Failed,
        }
    }
}

impl FeedState {
    /// State reached by applying `event`, or `None` if the table has no such edge
    pub fn on_event(self, event: FeedEvent) -> Option<FeedState> {
        use FeedEvent::*;
        use FeedState::*;

        match (self, event) {
            (Idle, SubscribeIssued) | (Failed, SubscribeIssued) => Some(Negotiating),
            (Negotiating, NegotiationSucceeded) => Some(Watching),
            (Negotiating, Error) | (Watching, Error) => Some(Failed),
            (Watching, Paused) => Some(Disabled),
            (Disabled, Resumed) => Some(Watching),
            _ => None,
        }
    }

    /// Whether the table allows moving directly from `self` to `next`
    pub fn can_transition_to(self, next: FeedState) -> bool {
        use FeedState::*;

        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Failed, Negotiating)
                | (Negotiating, Watching)
                | (Negotiating, Failed)
                | (Watching, Disabled)
                | (Watching, Failed)
                | (Disabled, Watching)
        )
    }

    /// Whether a subscription attempt has reached its outcome
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            FeedState::Watching | FeedState::Disabled | FeedState::Failed
        )
    }
}
