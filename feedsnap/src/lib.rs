//! # FeedSnap - Remote Snapshots from Janus Streaming Feeds
//!
//! FeedSnap subscribes to every mountpoint of a Janus streaming plugin and
//! answers still-image capture commands that arrive over a separate WebSocket
//! command channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use feedsnap::{FeedSnap, FeedSnapConfig, TestPatternMedia};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), feedsnap::FeedSnapError> {
//!     feedsnap::logging::init_logging();
//!
//!     let config = FeedSnapConfig::load("config.json")?;
//!     let feedsnap = FeedSnap::with_media(config, Arc::new(TestPatternMedia::default()));
//!
//!     // Connects to the gateway, then serves the command channel forever
//!     feedsnap.run().await
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use feedsnap_core::{
    FeedDescriptor, FeedId, FeedRegistry, FeedSnapConfig, FeedSnapError, FeedState,
    IceConfiguration, ImageFormat, LatestFrame, NotReadyReason, RenderTarget, Result,
    VideoFrame,
};
pub use feedsnap_media::{
    EncodedImage, SnapshotCoordinator, SnapshotEncoder, SnapshotResult, SnapshotStore,
    StoredSnapshot, TestPatternMedia,
};
pub use feedsnap_signaling::{
    Jsep, LoopbackGateway, MediaAnswer, MediaNegotiator, SessionManager, SessionManagerConfig,
    SignalingConnector, SignalingLink, WebSocketConnector,
};

// Public API modules
pub mod bridge;
pub mod channel;
pub mod command;
pub mod logging;

// Re-export main API types
pub use bridge::CommandBridge;
pub use channel::CommandChannel;
pub use command::{BatchEntry, Command, CommandResponse, FeedKey};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Mountpoints served in demo mode
pub const DEMO_CAMERAS: [u64; 4] = [1, 2, 3, 4];

/// Pause between command channel reconnection attempts
const COMMAND_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Main entry point for FeedSnap
#[derive(Debug, Clone)]
pub struct FeedSnap {
    inner: Arc<FeedSnapInner>,
}

#[derive(Debug)]
struct FeedSnapInner {
    config: FeedSnapConfig,
    session: SessionManager,
    bridge: CommandBridge,
}

impl FeedSnap {
    /// Wire the components around explicit signaling and media stacks
    pub fn new(
        config: FeedSnapConfig,
        connector: Arc<dyn SignalingConnector>,
        negotiator: Arc<dyn MediaNegotiator>,
    ) -> Self {
        let registry = FeedRegistry::new();
        let session = SessionManager::new(
            registry.clone(),
            connector,
            negotiator,
            SessionManagerConfig::from(&config.janus),
        );
        let coordinator = SnapshotCoordinator::from_config(registry, &config.snapshots);
        let bridge = CommandBridge::new(coordinator, config.snapshots.stereo_pair);

        Self {
            inner: Arc::new(FeedSnapInner {
                config,
                session,
                bridge,
            }),
        }
    }

    /// Production wiring: WebSocket signaling and the given media stack
    ///
    /// With `ui.demoMode` set the configuration is served by [`FeedSnap::demo`]
    /// instead and `negotiator` is unused.
    pub fn with_media(config: FeedSnapConfig, negotiator: Arc<dyn MediaNegotiator>) -> Self {
        if config.ui.demo_mode {
            return Self::demo(config);
        }
        Self::new(config, Arc::new(WebSocketConnector::new()), negotiator)
    }

    /// Simulated cameras: an in-process gateway and test-pattern surfaces
    pub fn demo(config: FeedSnapConfig) -> Self {
        info!("Demo mode: serving {} simulated cameras", DEMO_CAMERAS.len());
        Self::new(
            config,
            Arc::new(LoopbackGateway::with_cameras(&DEMO_CAMERAS)),
            Arc::new(TestPatternMedia::default()),
        )
    }

    /// Load configuration from `path` and wire production components
    pub fn load(path: impl AsRef<Path>, negotiator: Arc<dyn MediaNegotiator>) -> Result<Self> {
        let config = FeedSnapConfig::load(path)?;
        Ok(Self::with_media(config, negotiator))
    }

    /// Configuration in use
    pub fn config(&self) -> &FeedSnapConfig {
        &self.inner.config
    }

    /// Feed registry shared by every component
    pub fn registry(&self) -> &FeedRegistry {
        self.inner.session.registry()
    }

    /// Session manager
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    /// Command bridge
    pub fn bridge(&self) -> &CommandBridge {
        &self.inner.bridge
    }

    /// Connect to the configured gateway and start subscribing to every feed
    pub async fn connect(&self) -> Result<Vec<FeedDescriptor>> {
        let config = &self.inner.config;
        self.inner
            .session
            .connect(&config.janus.websocket_url(), config.ice.clone())
            .await
    }

    /// Close the gateway session
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.session.disconnect().await
    }

    /// Answer one command in-process
    pub async fn handle(&self, command: Command) -> CommandResponse {
        self.inner.bridge.handle(command).await
    }

    /// Serve the configured command channel until the server hangs up
    pub async fn serve_commands(&self) -> Result<()> {
        CommandChannel::new(self.inner.bridge.clone())
            .connect(&self.inner.config.commands.url)
            .await
    }

    /// Connect if configured to, then serve the command channel forever
    ///
    /// A gateway that cannot be reached is logged and commands are still
    /// served; every capture then reports a `null` image. The command channel
    /// is reconnected whenever it drops.
    pub async fn run(&self) -> Result<()> {
        if self.inner.config.ui.auto_connect {
            match self.connect().await {
                Ok(feeds) => info!("Subscribing to {} feeds", feeds.len()),
                Err(e) => error!("Could not connect to the gateway: {}", e),
            }
        }

        loop {
            if let Err(e) = self.serve_commands().await {
                warn!("Command channel unavailable: {}", e);
            }
            tokio::time::sleep(COMMAND_RECONNECT_DELAY).await;
        }
    }
}
