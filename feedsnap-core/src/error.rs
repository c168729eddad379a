//! Error types for feedsnap

use crate::feed::{FeedId, FeedState};
use std::time::Duration;
use thiserror::Error;

/// Why a feed cannot currently produce a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// The feed's subscription is not in the `Watching` state
    NotWatching(FeedState),
    /// The feed was excluded from capture through the enable toggle
    Disabled,
    /// No render target is bound, or the presentation layer dropped it
    NoRenderTarget,
    /// The render target has not produced a frame with non-zero dimensions yet
    NoFrame,
}

impl std::fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReadyReason::NotWatching(state) => write!(f, "feed is {}", state),
            NotReadyReason::Disabled => write!(f, "feed is disabled"),
            NotReadyReason::NoRenderTarget => write!(f, "no render target bound"),
            NotReadyReason::NoFrame => write!(f, "no frame rendered yet"),
        }
    }
}

/// Main error type for feedsnap operations
#[derive(Error, Debug)]
pub enum FeedSnapError {
    /// The signaling transport could not be reached
    #[error("Signaling server unavailable at {address}: {reason}")]
    SignalingUnavailable {
        /// Address that was dialled
        address: String,
        /// Underlying failure
        reason: String,
    },

    /// The streaming plugin could not be attached to the signaling session
    #[error("Failed to attach plugin {plugin}: {reason}")]
    PluginAttach {
        /// Plugin package name
        plugin: String,
        /// Underlying failure
        reason: String,
    },

    /// A feed state change that the lifecycle table does not allow
    #[error("Invalid transition for feed {feed_id}: {from} -> {to}")]
    InvalidTransition {
        /// Feed whose transition was rejected
        feed_id: FeedId,
        /// Current state
        from: FeedState,
        /// Requested state
        to: FeedState,
    },

    /// Unknown or disconnected feed id
    #[error("Feed not found: {feed_id}")]
    FeedNotFound {
        /// Feed id that was not found
        feed_id: FeedId,
    },

    /// Feed exists but has no capturable frame
    #[error("Feed {feed_id} not ready: {reason}")]
    FeedNotReady {
        /// Feed id
        feed_id: FeedId,
        /// What prevented the capture
        reason: NotReadyReason,
    },

    /// The signaling peer answered a request with an error
    #[error("Signaling error (code {code}): {reason}")]
    Signaling {
        /// Error code reported by the peer
        code: i64,
        /// Error reason reported by the peer
        reason: String,
    },

    /// No reply arrived for a signaling transaction
    #[error("Signaling transaction {transaction} timed out after {duration:?}")]
    TransactionTimeout {
        /// Transaction identifier
        transaction: String,
        /// How long we waited
        duration: Duration,
    },

    /// The signaling session is closed or was never opened
    #[error("Not connected to the signaling server")]
    NotConnected,

    /// Offer/answer negotiation failed for a feed
    #[error("Negotiation failed for feed {feed_id}: {reason}")]
    Negotiation {
        /// Feed id
        feed_id: FeedId,
        /// Reason for failure
        reason: String,
    },

    /// Image encoding failed
    #[error("Encoding failed for feed {feed_id}: {reason}")]
    Encoding {
        /// Feed id
        feed_id: FeedId,
        /// Reason for failure
        reason: String,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// The external command channel failed
    #[error("Command channel error: {reason}")]
    CommandChannel {
        /// Reason for failure
        reason: String,
    },

    /// JSON (de)serialization failed
    #[error("Serialization error: {source}")]
    Serialization {
        /// Underlying serde error
        #[from]
        source: serde_json::Error,
    },
}

impl FeedSnapError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            FeedSnapError::SignalingUnavailable { .. } => "SIGNALING_UNAVAILABLE".to_string(),
            FeedSnapError::PluginAttach { .. } => "PLUGIN_ATTACH_FAILED".to_string(),
            FeedSnapError::InvalidTransition { .. } => "INVALID_TRANSITION".to_string(),
            FeedSnapError::FeedNotFound { .. } => "FEED_NOT_FOUND".to_string(),
            FeedSnapError::FeedNotReady { .. } => "FEED_NOT_READY".to_string(),
            FeedSnapError::Signaling { .. } => "SIGNALING_ERROR".to_string(),
            FeedSnapError::TransactionTimeout { .. } => "TRANSACTION_TIMEOUT".to_string(),
            FeedSnapError::NotConnected => "NOT_CONNECTED".to_string(),
            FeedSnapError::Negotiation { .. } => "NEGOTIATION_FAILED".to_string(),
            FeedSnapError::Encoding { .. } => "ENCODING_FAILED".to_string(),
            FeedSnapError::Configuration { .. } => "CONFIGURATION_ERROR".to_string(),
            FeedSnapError::CommandChannel { .. } => "COMMAND_CHANNEL_ERROR".to_string(),
            FeedSnapError::Serialization { .. } => "SERIALIZATION_ERROR".to_string(),
        }
    }

    /// Whether this error is local to a single feed
    ///
    /// Feed-local errors are folded into absent-payload results inside a batch;
    /// everything else belongs to the session as a whole.
    pub fn is_feed_local(&self) -> bool {
        matches!(
            self,
            FeedSnapError::FeedNotFound { .. }
                | FeedSnapError::FeedNotReady { .. }
                | FeedSnapError::Encoding { .. }
                | FeedSnapError::Negotiation { .. }
        )
    }
}

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, FeedSnapError>;
