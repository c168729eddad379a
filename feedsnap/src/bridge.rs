//! Command bridge
//!
//! Maps each inbound [`Command`] onto the capture coordinator and produces
//! the single response it owes. Handling never fails: anything that goes
//! wrong for a feed is logged and reported as a `null` image.

use crate::command::{BatchEntry, Command, CommandResponse, FeedKey};
use feedsnap_core::{FeedId, FeedRegistry};
use feedsnap_media::{SnapshotCoordinator, SnapshotResult};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

/// Turns commands into responses
#[derive(Debug, Clone)]
pub struct CommandBridge {
    coordinator: SnapshotCoordinator,
    stereo_pair: [FeedId; 2],
}

impl CommandBridge {
    /// Bridge capturing through `coordinator`
    pub fn new(coordinator: SnapshotCoordinator, stereo_pair: [FeedId; 2]) -> Self {
        Self {
            coordinator,
            stereo_pair,
        }
    }

    fn registry(&self) -> &FeedRegistry {
        self.coordinator.registry()
    }

    /// Handle one command
    pub async fn handle(&self, command: Command) -> CommandResponse {
        debug!("Handling {}", command.event());
        match command {
            Command::TakeSnapshot { id } => self.take_snapshot(id).await,
            Command::TakeAllSnapshot => CommandResponse::SnapshotsAllResponse {
                data: entries(self.coordinator.capture_all_active().await),
            },
            Command::TakeStereoSnapshot => CommandResponse::SnapshotsStereoResponse {
                data: entries(self.coordinator.capture_many(&self.stereo_pair).await),
            },
            Command::TakeMultipleSnapshot { ids } => CommandResponse::SnapshotsMultipleResponse {
                data: self.take_multiple(ids).await,
            },
            Command::ToggleCamera { id, enabled } => self.toggle_camera(id, enabled),
        }
    }

    async fn take_snapshot(&self, key: FeedKey) -> CommandResponse {
        let image = match key.feed_id() {
            Some(feed_id) => match self.coordinator.capture_one(feed_id).await {
                Ok(image) => {
                    info!("Snapshot of feed {} ready ({})", feed_id, image.filename);
                    Some(image.data_url())
                }
                Err(e) if e.is_feed_local() => {
                    warn!("Snapshot of feed {} failed: {}", feed_id, e);
                    None
                }
                Err(e) => {
                    error!("Snapshot of feed {} failed: {}", feed_id, e);
                    None
                }
            },
            None => {
                warn!("Snapshot requested for unknown feed '{}'", key);
                None
            }
        };
        CommandResponse::SnapshotResponse { id: key, image }
    }

    async fn take_multiple(&self, keys: Vec<FeedKey>) -> Vec<BatchEntry> {
        let at = Utc::now();
        join_all(keys.into_iter().map(|key| async move {
            match key.feed_id() {
                Some(feed_id) => {
                    let result = self.coordinator.capture_result_at(feed_id, at).await;
                    BatchEntry {
                        id: key,
                        image: result.image,
                        camera: result.camera,
                    }
                }
                None => {
                    warn!("Snapshot requested for unknown feed '{}'", key);
                    BatchEntry {
                        camera: format!("Camera {}", key),
                        id: key,
                        image: None,
                    }
                }
            }
        }))
        .await
    }

    fn toggle_camera(&self, key: FeedKey, enabled: bool) -> CommandResponse {
        let success = match key.feed_id() {
            Some(feed_id) => match self.registry().set_enabled(feed_id, enabled) {
                Ok(()) => {
                    info!(
                        "Feed {} {}",
                        feed_id,
                        if enabled { "enabled" } else { "disabled" }
                    );
                    true
                }
                Err(e) => {
                    warn!("Cannot toggle feed {}: {}", feed_id, e);
                    false
                }
            },
            None => {
                warn!("Toggle requested for unknown feed '{}'", key);
                false
            }
        };
        CommandResponse::CameraToggled {
            id: key,
            enabled,
            success,
        }
    }
}

fn entries(results: Vec<SnapshotResult>) -> Vec<BatchEntry> {
    results
        .into_iter()
        .map(|result| BatchEntry {
            id: FeedKey::from(result.id),
            image: result.image,
            camera: result.camera,
        })
        .collect()
}
