//! On-disk snapshot archive
//!
//! Images are grouped by feed: `<root>/<feed id>/<filename>`.

use crate::error::EncodeResult;
use crate::snapshot::EncodedImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// An archived image as found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// File name inside the feed's directory
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Writes encoded snapshots below a root directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `root`; directories are created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an image will be written to
    pub fn path_for(&self, image: &EncodedImage) -> PathBuf {
        self.root
            .join(image.feed_id.to_string())
            .join(&image.filename)
    }

    /// Persist one image, returning where it was written
    pub async fn save(&self, image: &EncodedImage) -> EncodeResult<PathBuf> {
        let path = self.path_for(image);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, &image.bytes).await?;
        info!("Saved snapshot of feed {} to {}", image.feed_id, path.display());
        Ok(path)
    }

    /// Archived images grouped by feed directory, newest first
    ///
    /// A root that does not exist yet is an empty archive. Files that are not
    /// images are skipped.
    pub async fn list(&self) -> EncodeResult<BTreeMap<String, Vec<StoredSnapshot>>> {
        let mut archive = BTreeMap::new();
        let mut feeds = match tokio::fs::read_dir(&self.root).await {
            Ok(feeds) => feeds,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(archive),
            Err(e) => return Err(e.into()),
        };

        while let Some(feed_dir) = feeds.next_entry().await? {
            if !feed_dir.file_type().await?.is_dir() {
                continue;
            }

            let mut snapshots = Vec::new();
            let mut files = tokio::fs::read_dir(feed_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let filename = file.file_name().to_string_lossy().into_owned();
                let is_image = Path::new(&filename)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| {
                        IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                    });
                if !is_image {
                    continue;
                }

                let metadata = file.metadata().await?;
                snapshots.push(StoredSnapshot {
                    filename,
                    size: metadata.len(),
                    modified: DateTime::<Utc>::from(metadata.modified()?),
                });
            }

            snapshots.sort_by(|a, b| {
                b.modified
                    .cmp(&a.modified)
                    .then_with(|| b.filename.cmp(&a.filename))
            });
            archive.insert(feed_dir.file_name().to_string_lossy().into_owned(), snapshots);
        }

        debug!("Archive at {} holds {} feeds", self.root.display(), archive.len());
        Ok(archive)
    }
}
