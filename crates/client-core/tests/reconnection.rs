//! Behaviour after the transport drops underneath an established session

mod common;

use std::time::Duration;

use common::{harness, harness_with, harness_with_policy, Harness, WAIT};
use rtstream_client_core::{
    ClientEvent, ClientRole, ConnectionOptions, LayerData, Mid, ProjectionData, ReconnectPolicy, SessionState,
    SignalingCommand, Track, TrackKind, TransportEvent,
};
use serial_test::serial;

fn announce(h: &Harness, source_id: &str) -> bool {
    h.transport.emit(TransportEvent::ActiveSource {
        stream_id: "myStream".to_string(),
        track_ids: vec!["video/cam".to_string()],
        source_id: Some(source_id.to_string()),
    })
}

async fn wait_for_count(h: &Harness, name: &str, count: usize) {
    tokio::time::timeout(WAIT, async {
        while h.events.count(name) < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never saw {} {} events", count, name));
}

async fn wait_for_handshakes(h: &Harness, count: usize) {
    tokio::time::timeout(WAIT, async {
        while h.transport.handshake_count() < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never saw {} handshakes", count));
}

fn projects(commands: &[SignalingCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, SignalingCommand::Project { .. }))
        .count()
}

#[tokio::test]
#[serial]
async fn test_subscription_is_restored_after_drop() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;

    assert!(h.transport.drop_connection("network unreachable"));
    wait_for_count(&h, "subscribed", 2).await;

    assert_eq!(h.client.state(), SessionState::Subscribing);
    assert_eq!(h.transport.handshake_count(), 2);
    assert_eq!(h.transport.offers().len(), 2);
    assert_eq!(h.events.count("disconnected"), 1);
    assert_eq!(h.events.count("connected"), 2);
    assert_eq!(
        h.events.states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Subscribing,
            SessionState::Reconnecting,
            SessionState::Connected,
            SessionState::Subscribing,
        ]
    );
    // Track events are repeated for the new transceivers
    wait_for_count(&h, "audio_track", 2).await;
    assert_eq!(h.client.get_mid("video0"), Some(Mid::from("0")));
}

#[tokio::test]
#[serial]
async fn test_projection_waits_for_source_after_reconnect() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    announce(&h, "camA");
    h.events.wait_for_name("active", WAIT).await.unwrap();

    let pinned = LayerData::new("l", 0, 0);
    assert!(h.client.project(Some("camA"), vec![ProjectionData::new("cam", TrackKind::Video, "0")]));
    assert!(h.client.select(Some(pinned.clone())));
    h.wait_for_commands(2).await;

    h.transport.drop_connection("network unreachable");
    wait_for_count(&h, "subscribed", 2).await;
    h.settle().await;

    // Preference survives, projection stays parked until camA is back
    assert_eq!(h.client.selected_layer(), Some(pinned.clone()));
    assert!(h.client.projections().is_empty());
    let commands = h.transport.commands();
    assert_eq!(projects(&commands), 1);
    assert_eq!(commands.last(), Some(&SignalingCommand::Select { layer: Some(pinned) }));

    assert!(announce(&h, "camA"));
    h.wait_for_commands(4).await;
    let commands = h.transport.commands();
    assert_eq!(projects(&commands), 2);
    assert_eq!(
        commands[3],
        SignalingCommand::Project {
            source_id: Some("camA".to_string()),
            mappings: vec![ProjectionData::new("cam", TrackKind::Video, "0")],
        }
    );
    assert_eq!(h.client.projections().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_publish_is_restored_after_drop() {
    let h = harness(ClientRole::Publisher).await;
    h.client.add_track(Track::local("cam", TrackKind::Video));
    h.connect().await;
    assert!(h.client.publish());
    h.events.wait_for_name("publishing", WAIT).await.unwrap();
    assert!(h.client.record());
    h.events.wait_for_name("recording_started", WAIT).await.unwrap();

    h.transport.drop_connection("ice failed");
    wait_for_count(&h, "publishing", 2).await;

    assert_eq!(h.client.state(), SessionState::Publishing);
    assert_eq!(h.transport.offers().len(), 2);
    assert_eq!(h.client.get_mid("cam"), Some(Mid::from("0")));
    // Recording belongs to the lost session
    assert!(!h.client.is_recording());
}

#[tokio::test]
#[serial]
async fn test_reconnect_gives_up_after_max_attempts() {
    let h = harness(ClientRole::Subscriber).await;
    h.connect().await;
    h.transport.fail_handshakes(3, 503, "Service Unavailable");

    h.transport.drop_connection("network unreachable");
    let event = h.events.wait_for_name("connection_error", WAIT).await.unwrap();
    match event {
        ClientEvent::ConnectionError { status, reason } => {
            assert_eq!(status, 503);
            assert_eq!(reason, "Service Unavailable");
        }
        other => panic!("unexpected event {:?}", other),
    }
    h.wait_for_state(SessionState::Disconnected).await;

    // One initial handshake plus three reconnect attempts
    assert_eq!(h.transport.handshake_count(), 4);
    assert_eq!(h.events.count("disconnected"), 1);
    assert_eq!(h.events.count("connected"), 1);

    // A fresh connect still works
    assert!(h.client.connect());
    wait_for_count(&h, "connected", 2).await;
}

#[tokio::test]
#[serial]
async fn test_rejected_credentials_stop_reconnecting() {
    let h = harness(ClientRole::Subscriber).await;
    h.connect().await;
    h.transport.fail_next_handshake(401, "Unauthorized");

    h.transport.drop_connection("network unreachable");
    let event = h.events.wait_for_name("connection_error", WAIT).await.unwrap();
    assert!(matches!(event, ClientEvent::ConnectionError { status: 401, .. }));
    h.settle().await;
    assert_eq!(h.transport.handshake_count(), 2);
    assert_eq!(h.client.state(), SessionState::Disconnected);
}

#[tokio::test]
#[serial]
async fn test_drop_without_auto_reconnect() {
    let h = harness_with(ClientRole::Subscriber, ConnectionOptions::without_reconnect()).await;
    h.subscribe().await;

    h.transport.drop_connection("network unreachable");
    h.events.wait_for_name("disconnected", WAIT).await.unwrap();
    h.wait_for_state(SessionState::Disconnected).await;
    h.settle().await;

    assert_eq!(h.transport.handshake_count(), 1);
    assert_eq!(h.events.count("connection_error"), 0);
    assert!(!h.events.states().contains(&SessionState::Reconnecting));
    assert!(h.client.remote_tracks().is_empty());
    assert_eq!(h.transport.close_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_disconnect_cancels_reconnect() {
    let h = harness(ClientRole::Subscriber).await;
    h.connect().await;
    h.transport.set_handshake_delay(Duration::from_millis(50));

    h.transport.drop_connection("network unreachable");
    h.wait_for_state(SessionState::Reconnecting).await;
    assert!(h.client.is_reconnecting());
    assert!(h.client.disconnect());

    h.wait_for_state(SessionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(h.client.state(), SessionState::Disconnected);
    assert_eq!(h.events.count("connected"), 1);
    assert_eq!(h.events.count("connection_error"), 0);
}

#[tokio::test]
#[serial]
async fn test_drop_while_connected_only_reconnects() {
    let h = harness(ClientRole::Publisher).await;
    h.connect().await;

    h.transport.drop_connection("network unreachable");
    wait_for_count(&h, "connected", 2).await;
    h.settle().await;

    assert_eq!(h.client.state(), SessionState::Connected);
    assert!(h.transport.offers().is_empty());
    assert!(h.transport.is_open());
}

#[tokio::test]
#[serial]
async fn test_publish_in_flight_during_drop_is_negotiated_again() {
    let h = harness(ClientRole::Publisher).await;
    h.client.add_track(Track::local("cam", TrackKind::Video));
    h.connect().await;

    h.transport.delay_next_negotiation(Duration::from_millis(150));
    assert!(h.client.publish());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.transport.drop_connection("network unreachable"));

    h.events.wait_for_name("publishing", WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The answer from the dropped connection is discarded, the publish runs
    // again on the new one
    assert_eq!(h.transport.handshake_count(), 2);
    assert_eq!(h.transport.offers().len(), 2);
    assert_eq!(h.events.count("publishing"), 1);
    assert_eq!(
        h.events.states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Reconnecting,
            SessionState::Connected,
            SessionState::Publishing,
        ]
    );
    assert_eq!(h.client.state(), SessionState::Publishing);
    assert_eq!(h.client.get_mid("cam"), Some(Mid::from("0")));
}

fn slow_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        use_jitter: false,
    }
}

#[tokio::test]
#[serial]
async fn test_network_available_cuts_backoff_short() {
    let h = harness_with_policy(ClientRole::Subscriber, ConnectionOptions::default(), slow_reconnect()).await;
    h.connect().await;
    h.transport.fail_next_handshake(503, "Service Unavailable");

    h.transport.drop_connection("network unreachable");
    wait_for_handshakes(&h, 2).await;
    h.settle().await;
    assert!(h.client.is_reconnecting());
    assert_eq!(h.transport.handshake_count(), 2);

    assert!(h.client.network_available());
    wait_for_count(&h, "connected", 2).await;
    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.transport.handshake_count(), 3);
    assert_eq!(h.events.count("connection_error"), 0);
}

#[tokio::test]
#[serial]
async fn test_network_available_resumes_after_giving_up() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    h.transport.fail_handshakes(3, 0, "network unreachable");

    h.transport.drop_connection("network unreachable");
    h.events.wait_for_name("connection_error", WAIT).await.unwrap();
    h.wait_for_state(SessionState::Disconnected).await;

    assert!(h.client.network_available());
    wait_for_count(&h, "subscribed", 2).await;

    assert_eq!(h.client.state(), SessionState::Subscribing);
    assert_eq!(h.transport.handshake_count(), 5);
    assert_eq!(h.transport.offers().len(), 2);
    assert_eq!(
        h.events.states(),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Subscribing,
            SessionState::Reconnecting,
            SessionState::Disconnected,
            SessionState::Reconnecting,
            SessionState::Connected,
            SessionState::Subscribing,
        ]
    );
    // Nothing left to resume
    assert!(!h.client.network_available());
}

#[tokio::test]
#[serial]
async fn test_network_available_needs_a_parked_session() {
    let h = harness(ClientRole::Subscriber).await;
    assert!(!h.client.network_available());
    h.connect().await;
    assert!(!h.client.network_available());

    // Giving up, then disconnecting, forgets the session
    h.transport.fail_handshakes(3, 503, "Service Unavailable");
    h.transport.drop_connection("network unreachable");
    h.events.wait_for_name("connection_error", WAIT).await.unwrap();
    h.wait_for_state(SessionState::Disconnected).await;
    assert!(!h.client.disconnect());
    assert!(!h.client.network_available());

    // Rejected credentials are not retried on reachability
    assert!(h.client.connect());
    wait_for_count(&h, "connected", 2).await;
    h.transport.fail_next_handshake(401, "Unauthorized");
    h.transport.drop_connection("network unreachable");
    wait_for_count(&h, "connection_error", 2).await;
    h.wait_for_state(SessionState::Disconnected).await;
    assert!(!h.client.network_available());

    h.settle().await;
    assert_eq!(h.client.state(), SessionState::Disconnected);
    assert_eq!(h.transport.handshake_count(), 6);
}
