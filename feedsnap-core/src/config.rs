//! Configuration types and defaults
//!
//! Configuration is read once at startup from a JSON document. Keys are
//! camelCase; the snake_case spellings used by older deployments are accepted
//! as aliases. Every field is optional and falls back to the defaults below.

use crate::error::{FeedSnapError, Result};
use crate::feed::FeedId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Output image format for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossy JPEG
    #[default]
    #[serde(alias = "jpg", alias = "image/jpeg")]
    Jpeg,
    /// Lossless PNG
    #[serde(alias = "image/png")]
    Png,
}

impl ImageFormat {
    /// MIME type used in data URLs
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    /// File extension without the dot
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// Signaling gateway location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JanusConfig {
    /// Host name or address
    pub server: String,
    /// Port
    pub port: u16,
    /// Use `wss://` instead of `ws://`
    #[serde(alias = "use_tls", alias = "use_ssl", alias = "useSsl")]
    pub use_tls: bool,
    /// WebSocket path on the server
    #[serde(alias = "websocket_path")]
    pub websocket_path: String,
    /// How long to wait for a reply to a signaling request
    #[serde(alias = "transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,
}

impl Default for JanusConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 8188,
            use_tls: false,
            websocket_path: "/janus".to_string(),
            transaction_timeout_secs: 10,
        }
    }
}

impl JanusConfig {
    /// Signaling address, e.g. `ws://127.0.0.1:8188/janus`
    pub fn websocket_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.websocket_path.is_empty() || self.websocket_path.starts_with('/') {
            self.websocket_path.clone()
        } else {
            format!("/{}", self.websocket_path)
        };
        format!("{}://{}:{}{}", scheme, self.server, self.port, path)
    }

    /// Signaling transaction timeout
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs.max(1))
    }
}

/// Presentation-layer switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiConfig {
    /// Connect to the gateway as soon as the service starts
    #[serde(alias = "auto_connect")]
    pub auto_connect: bool,
    /// Serve simulated cameras from an in-process gateway instead of Janus
    #[serde(alias = "demo_mode")]
    pub demo_mode: bool,
    /// Whether the renderer applies fisheye correction
    #[serde(alias = "show_fisheye_correction")]
    pub show_fisheye_correction: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            auto_connect: true,
            demo_mode: false,
            show_fisheye_correction: true,
        }
    }
}

/// Snapshot encoding and delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Encoder quality on a 0.0 - 1.0 scale
    #[serde(alias = "image_quality")]
    pub image_quality: f32,
    /// Output format
    #[serde(alias = "image_format")]
    pub image_format: ImageFormat,
    /// Forward captured images to the server
    #[serde(alias = "save_to_server")]
    pub save_to_server: bool,
    /// Keep captured images in the client
    #[serde(alias = "save_to_browser")]
    pub save_to_browser: bool,
    /// Feeds captured by the stereo command, left then right
    #[serde(alias = "stereo_pair")]
    pub stereo_pair: [FeedId; 2],
    /// Where captures are written when `save_to_server` is set
    #[serde(alias = "save_directory", skip_serializing_if = "Option::is_none")]
    pub save_directory: Option<PathBuf>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            image_quality: 0.9,
            image_format: ImageFormat::Jpeg,
            save_to_server: true,
            save_to_browser: true,
            stereo_pair: [FeedId(1), FeedId(2)],
            save_directory: None,
        }
    }
}

/// Command channel endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandConfig {
    /// WebSocket URL of the command server
    pub url: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5001/commands".to_string(),
        }
    }
}

/// A STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE configuration handed to the media negotiator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IceConfiguration {
    /// STUN/TURN servers
    pub servers: Vec<IceServer>,
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSnapConfig {
    /// Signaling gateway
    pub janus: JanusConfig,
    /// Presentation switches
    pub ui: UiConfig,
    /// Snapshot settings
    pub snapshots: SnapshotConfig,
    /// Command channel
    pub commands: CommandConfig,
    /// ICE servers
    pub ice: IceConfiguration,
}

impl FeedSnapConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| FeedSnapError::Configuration {
            message: format!("invalid configuration: {}", e),
        })?;
        Ok(config.normalized())
    }

    /// Load configuration from a file
    ///
    /// A missing file yields the defaults; any other read or parse failure is
    /// an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => {
                let config = Self::from_json_str(&json)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found, using default configuration", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(FeedSnapError::Configuration {
                message: format!("cannot read {}: {}", path.display(), e),
            }),
        }
    }

    fn normalized(mut self) -> Self {
        let quality = self.snapshots.image_quality;
        if !(0.0..=1.0).contains(&quality) || quality.is_nan() {
            let clamped = if quality.is_nan() { 0.9 } else { quality.clamp(0.0, 1.0) };
            warn!("imageQuality {} out of range, using {}", quality, clamped);
            self.snapshots.image_quality = clamped;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeedSnapConfig::default();
        assert_eq!(config.snapshots.image_quality, 0.9);
        assert_eq!(config.snapshots.image_format, ImageFormat::Jpeg);
        assert!(config.snapshots.save_to_server);
        assert!(config.snapshots.save_to_browser);
        assert!(config.ui.auto_connect);
        assert!(!config.ui.demo_mode);
        assert_eq!(config.janus.websocket_url(), "ws://127.0.0.1:8188/janus");
    }

    #[test]
    fn test_partial_document_falls_back_to_defaults() {
        let config = FeedSnapConfig::from_json_str(
            r#"{ "janus": { "server": "10.0.0.192", "useTls": true }, "snapshots": { "imageFormat": "png" } }"#,
        )
        .unwrap();

        assert_eq!(config.janus.websocket_url(), "wss://10.0.0.192:8188/janus");
        assert_eq!(config.snapshots.image_format, ImageFormat::Png);
        assert_eq!(config.snapshots.image_quality, 0.9);
        assert_eq!(config.snapshots.stereo_pair, [FeedId(1), FeedId(2)]);
    }

    #[test]
    fn test_snake_case_aliases() {
        let config = FeedSnapConfig::from_json_str(
            r#"{
                "janus": { "server": "cams.local", "port": 8989, "use_ssl": true, "websocket_path": "ws" },
                "snapshots": { "save_to_server": false, "image_quality": 0.5, "image_format": "jpeg" },
                "ui": { "auto_connect": false, "show_fisheye_correction": false }
            }"#,
        )
        .unwrap();

        assert_eq!(config.janus.websocket_url(), "wss://cams.local:8989/ws");
        assert!(!config.snapshots.save_to_server);
        assert_eq!(config.snapshots.image_quality, 0.5);
        assert!(!config.ui.auto_connect);
    }

    #[test]
    fn test_quality_is_clamped() {
        let config =
            FeedSnapConfig::from_json_str(r#"{ "snapshots": { "imageQuality": 4.0 } }"#).unwrap();
        assert_eq!(config.snapshots.image_quality, 1.0);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let err = FeedSnapConfig::from_json_str("{ janus: ").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = FeedSnapConfig::load("/nonexistent/feedsnap.json").unwrap();
        assert_eq!(config, FeedSnapConfig::default());
    }
}
