//! Command Server Demo
//!
//! Plays the operator side of the command channel: a WebSocket server that
//! asks every connected FeedSnap instance for snapshots and logs what comes
//! back. A demo-mode FeedSnap is started in the same process and pointed at
//! the server.

use futures::{SinkExt, StreamExt};
use feedsnap::{FeedSnap, FeedSnapConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

const REQUESTS: [&str; 3] = [
    r#"{"event":"take_snapshot","data":{"id":1}}"#,
    r#"{"event":"take_all_snapshot","data":{}}"#,
    r#"{"event":"take_stereo_snapshot","data":{}}"#,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    feedsnap::logging::init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    info!("Command server listening on {}", addr);

    let mut config = FeedSnapConfig::default();
    config.ui.demo_mode = true;
    config.commands.url = format!("ws://{}/commands", addr);
    let feedsnap = FeedSnap::demo(config);
    let client = tokio::spawn(async move { feedsnap.run().await });

    let (stream, peer) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    info!("FeedSnap connected from {}", peer);

    // Give the simulated cameras a moment to come up
    tokio::time::sleep(Duration::from_millis(500)).await;
    for request in REQUESTS {
        ws.send(Message::Text(request.to_string())).await?;
    }

    let mut answered = 0;
    while answered < REQUESTS.len() {
        match tokio::time::timeout(Duration::from_secs(10), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                info!("<- {} ({} bytes)", value["event"], text.len());
                answered += 1;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                warn!("WebSocket error: {}", e);
                break;
            }
            Ok(None) | Err(_) => break,
        }
    }

    info!("{} of {} requests answered", answered, REQUESTS.len());
    ws.close(None).await?;
    client.abort();
    Ok(())
}
