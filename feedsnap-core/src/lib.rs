//! # feedsnap core
//!
//! Shared building blocks for feedsnap: the feed registry that owns every
//! feed's lifecycle state, rendered frame types, configuration and the error
//! taxonomy used across the workspace.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod feed;
pub mod frame;
pub mod registry;

// Re-export main types
pub use config::{
    CommandConfig, FeedSnapConfig, IceConfiguration, IceServer, ImageFormat, JanusConfig,
    SnapshotConfig, UiConfig,
};
pub use error::{FeedSnapError, NotReadyReason, Result};
pub use feed::{FeedDescriptor, FeedEvent, FeedId, FeedState, FisheyeCorrection};
pub use frame::{LatestFrame, RenderTarget, VideoFrame};
pub use registry::{FeedRegistry, FeedSession, RegisteredFeed};
