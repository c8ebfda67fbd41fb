//! Integration tests for the socket player over the in-memory transport.
//!
//! These drive full connection lifecycles: open, server info, channel
//! advertisement, message delivery, disconnect, and reconnect.

use std::time::Duration;

use tracing::info;

use super::*;
use crate::config::SocketPlayerConfig;
use crate::player::{AdvertiseOptions, Player, PublishPayload, SubscribePayload};
use crate::test_utils::{fake_transport, json_channel, wait_until, RecordingListener};
use crate::types::{Capability, Presence, Time};
use crate::PipelineError;

fn test_config() -> SocketPlayerConfig {
    SocketPlayerConfig {
        name: "ws://test:8765".to_string(),
        reconnect_delay_ms: 10,
        connect_timeout_ms: 1_000,
        suppression_window_ms: 50,
        ..SocketPlayerConfig::default()
    }
}

#[tokio::test]
async fn subscriptions_resolve_and_messages_flow() {
    let _ = tracing_subscriber::fmt::try_init();

    let (connector, mut server) = fake_transport();
    let mut player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());
    let (listener, states) = RecordingListener::new();
    player.set_listener(Box::new(listener));

    // Requested before any connection exists; resolves once the channel is
    // advertised post-connect
    player.set_subscriptions(vec![SubscribePayload::topic("/imu")]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("session-1"), &[]);
    conn.advertise(vec![json_channel(1, "/imu")]);

    assert!(
        wait_until(Duration::from_secs(2), || conn.link.subscribed_channels() == vec![1]).await
    );
    let sub_id = conn.link.subscriptions()[0];

    conn.message(sub_id, Time::from_millis(100), serde_json::json!({"accel": [0, 0, 9.8]}));

    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().iter().any(|state| {
                state
                    .active_data
                    .as_ref()
                    .is_some_and(|active| !active.messages.is_empty())
            })
        })
        .await
    );

    let all = states.lock().unwrap();
    let state = all
        .iter()
        .rev()
        .find(|s| s.active_data.as_ref().is_some_and(|a| !a.messages.is_empty()))
        .unwrap();
    assert_eq!(state.presence, Presence::Present);
    assert_eq!(state.player_id, "session-1");
    let active = state.active_data.as_ref().unwrap();
    assert_eq!(active.messages[0].topic, "/imu");
    assert_eq!(active.messages[0].message["accel"][2], 9.8);
    assert_eq!(active.topic_stats["/imu"].num_messages, 1);
    info!("received {} states", all.len());
}

#[tokio::test]
async fn disconnect_unresolves_and_reconnect_restores() {
    let _ = tracing_subscriber::fmt::try_init();

    let (connector, mut server) = fake_transport();
    let mut player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());
    let (listener, states) = RecordingListener::new();
    player.set_listener(Box::new(listener));
    player.set_subscriptions(vec![
        SubscribePayload::topic("/a"),
        SubscribePayload::topic("/b"),
        SubscribePayload::topic("/c"),
    ]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("session-1"), &[]);
    conn.advertise(vec![
        json_channel(1, "/a"),
        json_channel(2, "/b"),
        json_channel(3, "/c"),
    ]);
    assert!(
        wait_until(Duration::from_secs(2), || conn.link.subscriptions().len() == 3).await
    );

    conn.close();

    // A single connection-failure problem, presence RECONNECTING
    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().iter().any(|state| {
                state.presence == Presence::Reconnecting
                    && state.problems.len() == 1
                    && state.problems[0].message.contains("Connection failed")
            })
        })
        .await
    );

    // Reconnect: fresh advertisements resolve all three subscriptions again
    // and problems clear, without any new set_subscriptions call
    let conn2 = server.next_connection().await;
    conn2.open();
    conn2.server_info("robot", Some("session-1"), &[]);
    conn2.advertise(vec![
        json_channel(10, "/a"),
        json_channel(11, "/b"),
        json_channel(12, "/c"),
    ]);

    assert!(
        wait_until(Duration::from_secs(2), || conn2.link.subscriptions().len() == 3).await
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            states
                .lock()
                .unwrap()
                .last()
                .is_some_and(|state| {
                    state.presence == Presence::Present && state.problems.is_empty()
                })
        })
        .await
    );
}

#[tokio::test]
async fn time_regression_discards_pending_frame() {
    let (connector, mut server) = fake_transport();
    let mut player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());
    player.set_subscriptions(vec![SubscribePayload::topic("/scan")]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("session-1"), &[]);
    conn.advertise(vec![json_channel(1, "/scan")]);
    assert!(
        wait_until(Duration::from_secs(2), || !conn.link.subscriptions().is_empty()).await
    );
    let sub_id = conn.link.subscriptions()[0];

    // Both messages land before the listener is installed, so the first
    // emitted frame reflects the regression handling
    conn.message(sub_id, Time::from_millis(200), serde_json::json!({"n": 1}));
    conn.message(sub_id, Time::from_millis(100), serde_json::json!({"n": 2}));

    let (listener, states) = RecordingListener::new();
    player.set_listener(Box::new(listener));

    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().iter().any(|state| {
                state
                    .active_data
                    .as_ref()
                    .is_some_and(|active| active.last_seek_time == 1)
            })
        })
        .await
    );

    let all = states.lock().unwrap();
    let active = all
        .iter()
        .rev()
        .find_map(|state| state.active_data.as_ref())
        .unwrap();
    // Only the message that triggered the seek survives
    let total: usize = all
        .iter()
        .filter_map(|s| s.active_data.as_ref())
        .map(|a| a.messages.len())
        .sum();
    assert_eq!(total, 1);
    assert_eq!(active.last_seek_time, 1);
}

#[tokio::test]
async fn suppression_window_bounds_unknown_subscription_problems() {
    let (connector, mut server) = fake_transport();
    let mut player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());
    let (listener, states) = RecordingListener::new();
    player.set_listener(Box::new(listener));
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("session-1"), &[]);
    conn.advertise(vec![json_channel(1, "/a")]);
    assert!(
        wait_until(Duration::from_secs(2), || !conn.link.subscriptions().is_empty()).await
    );
    let sub_id = conn.link.subscriptions()[0];

    // Unsubscribe, then deliver a message already in flight
    player.set_subscriptions(vec![]);
    assert!(
        wait_until(Duration::from_secs(2), || conn.link.unsubscribed() == vec![sub_id]).await
    );
    conn.message(sub_id, Time::from_millis(100), serde_json::json!({}));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(states
        .lock()
        .unwrap()
        .iter()
        .all(|state| state.problems.is_empty()));

    // Past the suppression window the same message is a problem
    tokio::time::sleep(Duration::from_millis(60)).await;
    conn.message(sub_id, Time::from_millis(100), serde_json::json!({}));
    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().last().is_some_and(|state| {
                state.problems.len() == 1
                    && state.problems[0].message.contains("unknown subscription")
            })
        })
        .await
    );
}

#[tokio::test]
async fn server_session_change_resets_accumulated_state() {
    let (connector, mut server) = fake_transport();
    let mut player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());
    let (listener, states) = RecordingListener::new();
    player.set_listener(Box::new(listener));
    player.set_subscriptions(vec![SubscribePayload::topic("/a")]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("p1"), &[]);
    conn.advertise(vec![json_channel(1, "/a")]);
    assert!(
        wait_until(Duration::from_secs(2), || !conn.link.subscriptions().is_empty()).await
    );
    let sub_id = conn.link.subscriptions()[0];
    conn.message(sub_id, Time::from_millis(100), serde_json::json!({}));

    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().iter().any(|state| {
                state.player_id == "p1"
                    && state
                        .active_data
                        .as_ref()
                        .is_some_and(|active| !active.topic_stats.is_empty())
            })
        })
        .await
    );

    // The server announces a new session: identity swap
    conn.server_info("robot", Some("p2"), &[]);

    assert!(
        wait_until(Duration::from_secs(2), || {
            states.lock().unwrap().last().is_some_and(|state| state.player_id == "p2")
        })
        .await
    );
    let all = states.lock().unwrap();
    let state = all.last().unwrap();
    assert!(state.problems.is_empty());
    assert!(state
        .active_data
        .as_ref()
        .is_none_or(|active| active.topic_stats.is_empty()));
}

#[tokio::test]
async fn capability_gated_operations_fail_synchronously() {
    let (connector, mut server) = fake_transport();
    let player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());

    let conn = server.next_connection().await;
    conn.open();
    // No capabilities granted
    conn.server_info("robot", Some("session-1"), &[]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = player
        .publish(PublishPayload { topic: "/cmd".into(), msg: serde_json::json!({}) })
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedCapability { .. }));

    let err = player.set_parameter("gain".into(), serde_json::json!(2)).unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedCapability { .. }));

    assert!(matches!(
        player.start_playback(),
        Err(PipelineError::UnsupportedCapability { capability: Capability::PlaybackControl })
    ));
    assert!(matches!(
        player.set_playback_speed(0.5),
        Err(PipelineError::UnsupportedCapability { capability: Capability::SetSpeed })
    ));
}

#[tokio::test]
async fn client_publications_advertise_and_publish() {
    let (connector, mut server) = fake_transport();
    let player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());

    // Requested while disconnected: remembered as unresolved
    player.set_publishers(vec![AdvertiseOptions {
        topic: "/cmd".into(),
        encoding: "json".into(),
        schema_name: "Cmd".into(),
    }]);

    let conn = server.next_connection().await;
    conn.open();
    conn.server_info("robot", Some("session-1"), &["clientPublish"]);

    assert!(
        wait_until(Duration::from_secs(2), || {
            conn.link.advertised().iter().any(|opts| opts.topic == "/cmd")
        })
        .await
    );

    player
        .publish(PublishPayload { topic: "/cmd".into(), msg: serde_json::json!({"v": 1}) })
        .unwrap();
    let published = conn.link.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&published[0].1).unwrap()["v"],
        1
    );

    // Publishing on a topic never advertised is a caller error
    let err = player
        .publish(PublishPayload { topic: "/other".into(), msg: serde_json::json!({}) })
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownPublication { .. }));
}

#[tokio::test]
async fn close_stops_reconnection() {
    let (connector, mut server) = fake_transport();
    let player = SocketPlayer::new(connector, test_config(), DecoderRegistry::default());

    let conn = server.next_connection().await;
    conn.open();
    player.close();
    assert!(
        wait_until(Duration::from_secs(2), || conn.link.is_closed()).await
    );

    // No further connection attempts after close
    conn.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.accepted_is_empty());
}
