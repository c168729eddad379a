//! # FeedSnap Media
//!
//! Frame capture and still-image encoding. The coordinator reads the frame a
//! feed's render target currently shows, encodes it off the async runtime and
//! hands back bytes or a data URL.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod encoder;
pub mod error;
pub mod pattern;
pub mod snapshot;
pub mod store;

// Re-export main types
pub use encoder::{data_url, SnapshotEncoder};
pub use error::{EncodeError, EncodeResult};
pub use pattern::{test_pattern, TestPatternMedia};
pub use snapshot::{snapshot_filename, EncodedImage, SnapshotCoordinator, SnapshotResult};
pub use store::{SnapshotStore, StoredSnapshot};
