//! Command channel client
//!
//! Connects out to the command server, runs every inbound command in its own
//! task and funnels all responses through a single writer, so a slow capture
//! never holds up the commands behind it.

use crate::bridge::CommandBridge;
use crate::command::{Command, CommandResponse};
use feedsnap_core::{FeedSnapError, Result};
use feedsnap_signaling::{SignalingConnector, SignalingLink, WebSocketConnector};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Serves commands arriving on a text link
#[derive(Debug, Clone)]
pub struct CommandChannel {
    bridge: CommandBridge,
}

impl CommandChannel {
    /// Channel answering through `bridge`
    pub fn new(bridge: CommandBridge) -> Self {
        Self { bridge }
    }

    /// Connect to the command server at `url` and serve until it hangs up
    pub async fn connect(&self, url: &str) -> Result<()> {
        let link = WebSocketConnector::plain()
            .open(url)
            .await
            .map_err(|e| FeedSnapError::CommandChannel {
                reason: e.to_string(),
            })?;
        info!("Command channel connected to {}", url);
        self.serve(link).await
    }

    /// Serve commands from `link` until the peer goes away
    ///
    /// Unknown events and malformed frames are logged and skipped. Responses
    /// to commands still in flight when the peer leaves are dropped.
    pub async fn serve(&self, link: SignalingLink) -> Result<()> {
        let SignalingLink {
            outgoing,
            mut incoming,
        } = link;
        let (responses, mut pending) = mpsc::unbounded_channel::<CommandResponse>();

        let writer = tokio::spawn(async move {
            while let Some(response) = pending.recv().await {
                let frame = match response.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Could not serialize response: {}", e);
                        continue;
                    }
                };
                if outgoing.send(frame).is_err() {
                    warn!("Command channel closed before response could be sent");
                    break;
                }
            }
        });

        while let Some(text) = incoming.recv().await {
            let command = match Command::parse(&text) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Ignoring command frame: {}", e);
                    continue;
                }
            };

            let bridge = self.bridge.clone();
            let responses = responses.clone();
            tokio::spawn(async move {
                let event = command.event();
                let response = bridge.handle(command).await;
                if responses.send(response).is_err() {
                    debug!("Dropped response to {}", event);
                }
            });
        }

        info!("Command channel closed");
        drop(responses);
        if let Err(e) = writer.await {
            error!("Command writer task failed: {}", e);
        }
        Ok(())
    }
}
