//! End-to-end tests: loopback gateway, test-pattern media, command bridge

use feedsnap::*;
use std::sync::Arc;
use std::time::Duration;

async fn connected(ids: &[u64]) -> FeedSnap {
    let feedsnap = FeedSnap::new(
        FeedSnapConfig::default(),
        Arc::new(LoopbackGateway::with_cameras(ids)),
        Arc::new(TestPatternMedia::new(32, 24)),
    );
    feedsnap.connect().await.unwrap();
    for id in ids {
        tokio::time::timeout(
            Duration::from_secs(5),
            feedsnap
                .registry()
                .wait_for_state(FeedId(*id), |state| state == FeedState::Watching),
        )
        .await
        .expect("feed never reached watching")
        .unwrap();
    }
    feedsnap
}

fn snapshot_command(id: FeedKey) -> Command {
    Command::TakeSnapshot { id }
}

fn batch_ids(data: &[BatchEntry]) -> Vec<FeedKey> {
    data.iter().map(|entry| entry.id.clone()).collect()
}

#[tokio::test]
async fn test_take_snapshot_round_trip() {
    let feedsnap = connected(&[1, 2, 3]).await;

    match feedsnap.handle(snapshot_command(FeedKey::Number(2))).await {
        CommandResponse::SnapshotResponse { id, image } => {
            assert_eq!(id, FeedKey::Number(2));
            assert!(image.unwrap().starts_with("data:image/jpeg;base64,"));
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_string_id_is_echoed_verbatim() {
    let feedsnap = connected(&[1, 2]).await;

    match feedsnap
        .handle(snapshot_command(FeedKey::Text("2".to_string())))
        .await
    {
        CommandResponse::SnapshotResponse { id, image } => {
            assert_eq!(id, FeedKey::Text("2".to_string()));
            assert!(image.is_some());
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_feed_yields_null_image() {
    let feedsnap = connected(&[1, 2, 3]).await;

    let response = feedsnap.handle(snapshot_command(FeedKey::Number(99))).await;
    assert_eq!(
        response,
        CommandResponse::SnapshotResponse {
            id: FeedKey::Number(99),
            image: None
        }
    );
}

#[tokio::test]
async fn test_disconnect_makes_every_feed_unknown() {
    let feedsnap = connected(&[1, 2]).await;
    feedsnap.disconnect().await.unwrap();

    let response = feedsnap
        .bridge()
        .handle(snapshot_command(FeedKey::Number(1)))
        .await;
    assert_eq!(
        response,
        CommandResponse::SnapshotResponse {
            id: FeedKey::Number(1),
            image: None
        }
    );

    let coordinator = SnapshotCoordinator::new(feedsnap.registry().clone(), SnapshotEncoder::default());
    let err = coordinator.capture_one(FeedId(1)).await.unwrap_err();
    assert!(matches!(err, FeedSnapError::FeedNotFound { .. }));
}

#[tokio::test]
async fn test_concurrent_batches_are_correlated() {
    let feedsnap = connected(&[1, 2, 3]).await;

    let (all, stereo) = tokio::join!(
        feedsnap.handle(Command::TakeAllSnapshot),
        feedsnap.handle(Command::TakeStereoSnapshot)
    );

    match all {
        CommandResponse::SnapshotsAllResponse { data } => {
            assert_eq!(
                batch_ids(&data),
                vec![FeedKey::Number(1), FeedKey::Number(2), FeedKey::Number(3)]
            );
            assert!(data.iter().all(|entry| entry.image.is_some()));
        }
        other => panic!("unexpected response {:?}", other),
    }
    match stereo {
        CommandResponse::SnapshotsStereoResponse { data } => {
            assert_eq!(batch_ids(&data), vec![FeedKey::Number(1), FeedKey::Number(2)]);
            assert_eq!(data[0].camera, "Camera 1");
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_disabled_camera_is_left_out_of_all_snapshot() {
    let feedsnap = connected(&[1, 2, 3]).await;

    let toggled = feedsnap
        .handle(Command::ToggleCamera {
            id: FeedKey::Number(3),
            enabled: false,
        })
        .await;
    assert_eq!(
        toggled,
        CommandResponse::CameraToggled {
            id: FeedKey::Number(3),
            enabled: false,
            success: true
        }
    );

    match feedsnap.handle(Command::TakeAllSnapshot).await {
        CommandResponse::SnapshotsAllResponse { data } => {
            assert_eq!(batch_ids(&data), vec![FeedKey::Number(1), FeedKey::Number(2)]);
        }
        other => panic!("unexpected response {:?}", other),
    }

    // The feed is still subscribed; only capture eligibility changed
    assert_eq!(feedsnap.registry().state(FeedId(3)), Some(FeedState::Watching));
    match feedsnap.handle(snapshot_command(FeedKey::Number(3))).await {
        CommandResponse::SnapshotResponse { image, .. } => assert!(image.is_none()),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_toggle_unknown_camera_reports_failure() {
    let feedsnap = connected(&[1]).await;

    let response = feedsnap
        .handle(Command::ToggleCamera {
            id: FeedKey::Text("front".to_string()),
            enabled: true,
        })
        .await;
    assert_eq!(
        response,
        CommandResponse::CameraToggled {
            id: FeedKey::Text("front".to_string()),
            enabled: true,
            success: false
        }
    );
}

#[tokio::test]
async fn test_multiple_snapshot_keeps_request_order() {
    let feedsnap = connected(&[1, 2, 3]).await;
    let ids = vec![
        FeedKey::Number(3),
        FeedKey::Text("1".to_string()),
        FeedKey::Text("front".to_string()),
        FeedKey::Number(42),
    ];

    match feedsnap
        .handle(Command::TakeMultipleSnapshot { ids: ids.clone() })
        .await
    {
        CommandResponse::SnapshotsMultipleResponse { data } => {
            assert_eq!(batch_ids(&data), ids);
            assert!(data[0].image.is_some());
            assert!(data[1].image.is_some());
            assert!(data[2].image.is_none());
            assert_eq!(data[2].camera, "Camera front");
            assert!(data[3].image.is_none());
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_command_channel_answers_each_frame_once() {
    let feedsnap = connected(&[1, 2]).await;
    let (client_side, mut server_side) = SignalingLink::pair();

    let channel = CommandChannel::new(feedsnap.bridge().clone());
    let serving = tokio::spawn(async move { channel.serve(client_side).await });

    for frame in [
        r#"{"event":"take_snapshot","data":{"id":"2"}}"#,
        r#"{"event":"self_destruct","data":{}}"#,
        "{not json",
        r#"{"event":"take_stereo_snapshot","data":{}}"#,
    ] {
        server_side.outgoing.send(frame.to_string()).unwrap();
    }

    let mut responses = Vec::new();
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(5), server_side.incoming.recv())
            .await
            .unwrap()
            .unwrap();
        responses.push(serde_json::from_str::<serde_json::Value>(&frame).unwrap());
    }

    let single = responses
        .iter()
        .find(|r| r["event"] == "snapshot_response")
        .expect("no snapshot_response");
    assert_eq!(single["data"]["id"], "2");
    assert!(single["data"]["image"].is_string());

    let stereo = responses
        .iter()
        .find(|r| r["event"] == "snapshots_stereo_response")
        .expect("no snapshots_stereo_response");
    assert_eq!(stereo["data"]["data"].as_array().unwrap().len(), 2);

    drop(server_side.outgoing);
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(server_side.incoming.try_recv().is_err());
}

#[tokio::test]
async fn test_odd_ids_are_answered_with_null_image() {
    let feedsnap = connected(&[1]).await;
    let (client_side, mut server_side) = SignalingLink::pair();

    let channel = CommandChannel::new(feedsnap.bridge().clone());
    let serving = tokio::spawn(async move { channel.serve(client_side).await });

    for id in [serde_json::json!(-1), serde_json::json!(2.5), serde_json::Value::Null] {
        let frame = serde_json::json!({ "event": "take_snapshot", "data": { "id": id } });
        server_side.outgoing.send(frame.to_string()).unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), server_side.incoming.recv())
            .await
            .expect("no response")
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["event"], "snapshot_response");
        assert_eq!(reply["data"]["id"], id);
        assert!(reply["data"]["image"].is_null());
    }

    drop(server_side.outgoing);
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_demo_mode_serves_simulated_cameras() {
    let mut config = FeedSnapConfig::default();
    config.ui.demo_mode = true;
    let feedsnap = FeedSnap::with_media(config, Arc::new(TestPatternMedia::new(8, 8)));

    let feeds = feedsnap.connect().await.unwrap();
    assert_eq!(feeds.len(), DEMO_CAMERAS.len());

    tokio::time::timeout(
        Duration::from_secs(5),
        feedsnap
            .registry()
            .wait_for_state(FeedId(1), |state| state == FeedState::Watching),
    )
    .await
    .unwrap()
    .unwrap();
    match feedsnap.handle(snapshot_command(FeedKey::Number(1))).await {
        CommandResponse::SnapshotResponse { image, .. } => assert!(image.is_some()),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_gateway_is_reported() {
    let gateway = LoopbackGateway::with_cameras(&[1]);
    gateway.set_unreachable(true);
    let feedsnap = FeedSnap::new(
        FeedSnapConfig::default(),
        Arc::new(gateway),
        Arc::new(TestPatternMedia::default()),
    );

    let err = feedsnap.connect().await.unwrap_err();
    assert_eq!(err.error_code(), "SIGNALING_UNAVAILABLE");
    assert!(!feedsnap.session().is_connected());
}
