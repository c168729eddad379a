//! Loopback Demo
//!
//! Runs FeedSnap against the in-process gateway with test-pattern cameras,
//! then drives it with the same commands a remote operator would send and
//! prints the responses (image payloads shortened).

use anyhow::Context;
use feedsnap::{Command, CommandResponse, FeedId, FeedKey, FeedSnap, FeedSnapConfig, FeedState};
use std::time::Duration;
use tracing::{info, warn};

fn shorten(response: &CommandResponse) -> anyhow::Result<String> {
    let mut value = serde_json::to_value(response)?;
    let shrink = |image: &mut serde_json::Value| {
        if let Some(url) = image.as_str() {
            *image = format!("{}... ({} chars)", &url[..url.len().min(32)], url.len()).into();
        }
    };

    if let Some(image) = value.pointer_mut("/data/image") {
        shrink(image);
    }
    if let Some(entries) = value.pointer_mut("/data/data").and_then(|d| d.as_array_mut()) {
        for entry in entries {
            if let Some(image) = entry.get_mut("image") {
                shrink(image);
            }
        }
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    feedsnap::logging::init_logging();

    info!("FeedSnap loopback demo");
    let feedsnap = FeedSnap::demo(FeedSnapConfig::default());

    let feeds = feedsnap.connect().await.context("connecting to loopback gateway")?;
    for feed in &feeds {
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            feedsnap
                .registry()
                .wait_for_state(feed.id, |state| state.is_settled()),
        )
        .await
        .context("waiting for feeds")??;
        match state {
            FeedState::Watching => info!("{} is live", feed.label()),
            other => warn!("{} settled as {}", feed.label(), other),
        }
    }

    let commands = vec![
        Command::TakeSnapshot {
            id: FeedKey::Number(2),
        },
        Command::TakeSnapshot {
            id: FeedKey::Text("99".to_string()),
        },
        Command::ToggleCamera {
            id: FeedKey::Number(3),
            enabled: false,
        },
        Command::TakeAllSnapshot,
        Command::TakeStereoSnapshot,
    ];

    for command in commands {
        info!("-> {}", command.event());
        let response = feedsnap.handle(command).await;
        println!("{}", shorten(&response)?);
    }

    feedsnap.session().pause(FeedId(1)).await?;
    info!("Feed 1 paused: {:?}", feedsnap.registry().state(FeedId(1)));

    feedsnap.disconnect().await?;
    info!("Disconnected; {} feeds remain", feedsnap.registry().len());
    Ok(())
}
