//! Snapshot capture coordinator
//!
//! Reads whatever frame is currently on a feed's render target and encodes it.
//! Batch captures run every feed concurrently and always produce one result
//! per requested id, in request order; a feed that cannot be captured yields a
//! result without an image instead of failing the batch. Every feed of a
//! batch is stamped with the same capture time, so archived files of one
//! batch share their timestamp.

use crate::encoder::{data_url, SnapshotEncoder};
use crate::store::SnapshotStore;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use feedsnap_core::{
    FeedId, FeedRegistry, FeedSnapError, FeedState, ImageFormat, NotReadyReason, Result,
    SnapshotConfig, VideoFrame,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One encoded still image
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    /// Feed the frame came from
    pub feed_id: FeedId,
    /// Encoding used
    pub format: ImageFormat,
    /// Encoded bytes
    pub bytes: Bytes,
    /// Suggested file name, `camera_<id>_<timestamp>.<ext>`
    pub filename: String,
    /// Capture time; shared by every image of a batch
    pub captured_at: DateTime<Utc>,
}

impl EncodedImage {
    /// MIME type of the payload
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Payload as a `data:` URL
    pub fn data_url(&self) -> String {
        data_url(self.format, &self.bytes)
    }
}

/// Per-feed outcome inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResult {
    /// Feed id
    pub id: FeedId,
    /// Data URL, or `None` when the capture failed
    pub image: Option<String>,
    /// Display label of the feed
    pub camera: String,
}

/// Suggested file name for a capture of `feed_id` at `at`
///
/// The timestamp is ISO-8601 with `:` and `.` replaced so it is safe on every
/// filesystem, e.g. `camera_2_2024-05-01T10-15-30-123Z.jpg`.
pub fn snapshot_filename(feed_id: FeedId, at: DateTime<Utc>, format: ImageFormat) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("camera_{}_{}.{}", feed_id, stamp, format.extension())
}

/// Captures frames from registered feeds
#[derive(Debug, Clone)]
pub struct SnapshotCoordinator {
    registry: FeedRegistry,
    encoder: SnapshotEncoder,
    store: Option<SnapshotStore>,
}

impl SnapshotCoordinator {
    /// Coordinator using the given encoder
    pub fn new(registry: FeedRegistry, encoder: SnapshotEncoder) -> Self {
        Self {
            registry,
            encoder,
            store: None,
        }
    }

    /// Coordinator with the encoder and archive described by `config`
    ///
    /// Captures are archived only when `save_to_server` is set and a save
    /// directory is configured.
    pub fn from_config(registry: FeedRegistry, config: &SnapshotConfig) -> Self {
        let coordinator = Self::new(registry, SnapshotEncoder::from_config(config));
        match (&config.save_directory, config.save_to_server) {
            (Some(dir), true) => coordinator.with_store(SnapshotStore::new(dir)),
            _ => coordinator,
        }
    }

    /// Archive every successful capture in `store`
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Registry the coordinator reads from
    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    /// Encoder settings in use
    pub fn encoder(&self) -> &SnapshotEncoder {
        &self.encoder
    }

    /// Archive captures are written to, if any
    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    /// Read the current frame of a feed without encoding it
    fn current_frame(&self, feed_id: FeedId) -> Result<VideoFrame> {
        let feed = self
            .registry
            .get(feed_id)
            .ok_or(FeedSnapError::FeedNotFound { feed_id })?;
        let not_ready = |reason| FeedSnapError::FeedNotReady { feed_id, reason };

        if feed.session.state != FeedState::Watching {
            return Err(not_ready(NotReadyReason::NotWatching(feed.session.state)));
        }
        if !feed.session.enabled {
            return Err(not_ready(NotReadyReason::Disabled));
        }
        let target = feed
            .session
            .render_target()
            .ok_or_else(|| not_ready(NotReadyReason::NoRenderTarget))?;
        target
            .current_frame()
            .filter(VideoFrame::has_dimensions)
            .ok_or_else(|| not_ready(NotReadyReason::NoFrame))
    }

    /// Capture and encode the frame currently displayed for one feed
    pub async fn capture_one(&self, feed_id: FeedId) -> Result<EncodedImage> {
        self.capture_one_at(feed_id, Utc::now()).await
    }

    /// Capture one feed, stamping it with `captured_at`
    pub async fn capture_one_at(
        &self,
        feed_id: FeedId,
        captured_at: DateTime<Utc>,
    ) -> Result<EncodedImage> {
        let frame = self.current_frame(feed_id)?;
        let bytes = self
            .encoder
            .encode(frame)
            .await
            .map_err(|e| e.for_feed(feed_id))?;

        debug!("Captured feed {} ({} bytes)", feed_id, bytes.len());
        let image = EncodedImage {
            feed_id,
            format: self.encoder.format(),
            bytes,
            filename: snapshot_filename(feed_id, captured_at, self.encoder.format()),
            captured_at,
        };

        if let Some(store) = &self.store {
            // Archiving is best effort; the caller still gets the image
            if let Err(e) = store.save(&image).await {
                warn!("Could not archive snapshot of feed {}: {}", feed_id, e);
            }
        }
        Ok(image)
    }

    /// Capture many feeds concurrently
    ///
    /// Never fails as a whole: the result has one entry per requested id, in
    /// request order, with `image: None` for every feed that failed.
    pub async fn capture_many(&self, ids: &[FeedId]) -> Vec<SnapshotResult> {
        let at = Utc::now();
        join_all(ids.iter().map(|id| self.capture_result_at(*id, at))).await
    }

    /// Capture every feed that is Watching and enabled right now
    ///
    /// The set of feeds is fixed before the first capture starts; feeds that
    /// change state while the batch runs are captured or reported as failed,
    /// never added or dropped.
    pub async fn capture_all_active(&self) -> Vec<SnapshotResult> {
        let ids = self.registry.active_ids();
        debug!("Capturing {} active feeds", ids.len());
        self.capture_many(&ids).await
    }

    /// Capture one feed and fold the outcome into a batch entry
    pub async fn capture_result(&self, feed_id: FeedId) -> SnapshotResult {
        self.capture_result_at(feed_id, Utc::now()).await
    }

    /// Batch entry for one feed of a batch taken at `at`
    pub async fn capture_result_at(&self, feed_id: FeedId, at: DateTime<Utc>) -> SnapshotResult {
        let camera = self
            .registry
            .get(feed_id)
            .map(|feed| feed.descriptor.label())
            .unwrap_or_else(|| format!("Camera {}", feed_id));

        let image = match self.capture_one_at(feed_id, at).await {
            Ok(image) => Some(image.data_url()),
            Err(e) => {
                warn!("Snapshot of feed {} failed: {}", feed_id, e);
                None
            }
        };

        SnapshotResult {
            id: feed_id,
            image,
            camera,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filename_is_filesystem_safe() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(
            snapshot_filename(FeedId(2), at, ImageFormat::Jpeg),
            "camera_2_2024-05-01T10-15-30-123Z.jpg"
        );
        assert_eq!(
            snapshot_filename(FeedId(7), at, ImageFormat::Png),
            "camera_7_2024-05-01T10-15-30-123Z.png"
        );
    }

    #[tokio::test]
    async fn test_unknown_feed_is_not_found() {
        let coordinator = SnapshotCoordinator::new(FeedRegistry::new(), SnapshotEncoder::default());
        let err = coordinator.capture_one(FeedId(99)).await.unwrap_err();
        assert!(matches!(err, FeedSnapError::FeedNotFound { feed_id } if feed_id == FeedId(99)));
    }

    #[tokio::test]
    async fn test_batch_of_nothing_is_empty() {
        let coordinator = SnapshotCoordinator::new(FeedRegistry::new(), SnapshotEncoder::default());
        assert!(coordinator.capture_all_active().await.is_empty());
        assert!(coordinator.capture_many(&[]).await.is_empty());
    }
}
