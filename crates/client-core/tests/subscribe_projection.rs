//! Subscribing, source bookkeeping, projection and layer selection

mod common;

use common::{harness, WAIT};
use rtstream_client_core::{
    ClientEvent, ClientOptions, ClientRole, LayerData, Mid, ProjectionData, SessionState, SignalingCommand,
    TrackKind, TransportEvent, VideoQuality,
};

fn announce(h: &common::Harness, source_id: Option<&str>) -> bool {
    h.transport.emit(TransportEvent::ActiveSource {
        stream_id: "myStream".to_string(),
        track_ids: vec!["video/cam".to_string(), "audio/mic".to_string()],
        source_id: source_id.map(str::to_string),
    })
}

fn video(mid: &str) -> ProjectionData {
    ProjectionData::new("video", TrackKind::Video, mid)
}

#[tokio::test]
async fn test_subscribe_reports_inbound_tracks_in_order() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    h.events.wait_for_name("audio_track", WAIT).await.unwrap();

    let names = h.events.names();
    let subscribed = names.iter().position(|n| *n == "subscribed").unwrap();
    assert_eq!(&names[subscribed..], &["subscribed", "video_track", "audio_track"]);
    assert_eq!(h.client.state(), SessionState::Subscribing);
    assert_eq!(h.client.get_mid("video0"), Some(Mid::from("0")));
    assert_eq!(h.client.get_mid("audio1"), Some(Mid::from("1")));
}

#[tokio::test]
async fn test_subscribe_requires_connection() {
    let h = harness(ClientRole::Subscriber).await;
    assert!(!h.client.subscribe());
    h.connect().await;
    assert!(h.client.subscribe());
    assert!(!h.client.subscribe(), "subscribe already in flight");
}

#[tokio::test]
async fn test_receive_plan_follows_audio_options() {
    let h = harness(ClientRole::Subscriber).await;
    h.connect().await;
    let options = ClientOptions::new().with_multiplexed_audio_tracks(2);
    assert!(h.client.subscribe_with_options(Some(options)));
    h.events.wait_for_name("subscribed", WAIT).await.unwrap();

    let offer = &h.transport.offers()[0];
    assert_eq!(offer.receive, vec![TrackKind::Video, TrackKind::Audio, TrackKind::Audio, TrackKind::Audio]);
    assert_eq!(h.client.remote_tracks().len(), 4);

    let muted = harness(ClientRole::Subscriber).await;
    muted.connect().await;
    assert!(muted.client.subscribe_with_options(Some(ClientOptions::new().with_disable_audio(true))));
    muted.events.wait_for_name("subscribed", WAIT).await.unwrap();
    assert_eq!(muted.transport.offers()[0].receive, vec![TrackKind::Video]);
}

#[tokio::test]
async fn test_active_and_inactive_sources() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;

    assert!(announce(&h, Some("camA")));
    let event = h.events.wait_for_name("active", WAIT).await.unwrap();
    match event {
        ClientEvent::SourceActive { stream_id, track_ids, source_id } => {
            assert_eq!(stream_id, "myStream");
            assert_eq!(track_ids.len(), 2);
            assert_eq!(source_id.as_deref(), Some("camA"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    let sources = h.client.active_sources();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].has_track("cam"));

    assert!(h.client.project(Some("camA"), vec![video("0")]));
    assert_eq!(h.client.projections().len(), 1);

    h.transport.emit(TransportEvent::InactiveSource {
        stream_id: "myStream".to_string(),
        source_id: Some("camA".to_string()),
    });
    h.events.wait_for_name("inactive", WAIT).await.unwrap();
    assert!(h.client.active_sources().is_empty());
    assert!(h.client.projections().is_empty(), "projections of an inactive source are dropped");
}

#[tokio::test]
async fn test_project_validation() {
    let h = harness(ClientRole::Subscriber).await;
    h.connect().await;
    assert!(!h.client.project(None, vec![video("0")]), "not subscribed yet");

    assert!(h.client.subscribe());
    h.events.wait_for_name("subscribed", WAIT).await.unwrap();

    assert!(!h.client.project(None, vec![]), "empty projection list");
    assert!(!h.client.project(Some("ghost"), vec![video("0")]), "source never announced");

    announce(&h, Some("camA"));
    h.events.wait_for_name("active", WAIT).await.unwrap();
    assert!(!h.client.project(Some("camA"), vec![video("9")]), "unknown mid");
    assert!(
        !h.client.project(Some("camA"), vec![ProjectionData::new("mic", TrackKind::Audio, "0")]),
        "mid 0 carries video"
    );
    assert!(h.client.projections().is_empty());

    // The automatic source needs no announcement
    assert!(h.client.project(None, vec![video("0")]));
    h.wait_for_commands(1).await;
    assert_eq!(
        h.transport.commands()[0],
        SignalingCommand::Project { source_id: None, mappings: vec![video("0")] }
    );
}

#[tokio::test]
async fn test_rejected_projection_is_rolled_back() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    announce(&h, Some("camA"));
    h.events.wait_for_name("active", WAIT).await.unwrap();

    h.transport.fail_next_command("projection refused");
    assert!(h.client.project(Some("camA"), vec![video("0")]));
    let error = h.events.wait_for_name("signaling_error", WAIT).await.unwrap();
    assert!(matches!(error, ClientEvent::SignalingError { message } if message.contains("projection refused")));
    assert!(h.client.projections().is_empty());
}

#[tokio::test]
async fn test_unproject_unknown_mid_is_harmless() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;

    assert!(h.client.project(None, vec![video("0")]));
    assert!(h.client.unproject(vec![Mid::from("0")]));
    assert!(h.client.projections().is_empty());
    assert!(h.client.unproject(vec![Mid::from("0"), Mid::from("42")]));

    h.wait_for_commands(3).await;
    let commands = h.transport.commands();
    assert_eq!(commands[1], SignalingCommand::Unproject { mids: vec![Mid::from("0")] });
    assert!(h.events.count("signaling_error") == 0);
}

#[tokio::test]
async fn test_layers_build_quality_ladder() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    assert_eq!(h.client.video_qualities(&Mid::from("0")), vec![VideoQuality::Auto]);

    let active = vec![LayerData::new("h", 0, 0), LayerData::new("h", 0, 1), LayerData::new("l", 0, 0)];
    h.transport.emit(TransportEvent::LayersChanged {
        mid: Mid::from("0"),
        active: active.clone(),
        inactive: vec![],
    });
    let event = h.events.wait_for_name("layers", WAIT).await.unwrap();
    assert!(matches!(event, ClientEvent::Layers { mid, .. } if mid == Mid::from("0")));

    let ladder = h.client.video_qualities(&Mid::from("0"));
    assert_eq!(
        ladder,
        vec![
            VideoQuality::Auto,
            VideoQuality::High(LayerData::new("h", 0, 0)),
            VideoQuality::Low(LayerData::new("l", 0, 0)),
        ]
    );
    assert_eq!(h.client.layers(&Mid::from("0")).unwrap().active, active);

    // Pinning a rung only sends the preference
    assert!(h.client.select(ladder[2].layer().cloned()));
    h.wait_for_commands(1).await;
    assert_eq!(
        h.transport.commands()[0],
        SignalingCommand::Select { layer: Some(LayerData::new("l", 0, 0)) }
    );
}

#[tokio::test]
async fn test_vad_and_stopped_are_forwarded() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;

    h.transport.emit(TransportEvent::Vad { mid: Mid::from("1"), source_id: Some("mic2".to_string()) });
    h.transport.emit(TransportEvent::Stopped);
    h.events.wait_for_name("stopped", WAIT).await.unwrap();

    let vad = h.events.wait_for_name("vad", WAIT).await.unwrap();
    assert!(matches!(vad, ClientEvent::Vad { source_id: Some(ref s), .. } if s == "mic2"));
    assert_eq!(h.client.state(), SessionState::Subscribing);
}

#[tokio::test]
async fn test_add_remote_track_renegotiates() {
    let h = harness(ClientRole::Subscriber).await;
    assert!(!h.client.add_remote_track(TrackKind::Audio), "not subscribed");
    h.subscribe().await;
    h.events.wait_for_name("audio_track", WAIT).await.unwrap();

    assert!(h.client.add_remote_track(TrackKind::Audio));
    let event = h
        .events
        .wait_for(WAIT, |e| matches!(e, ClientEvent::AudioTrack { mid, .. } if mid.as_str() == "2"))
        .await;
    assert!(event.is_some());
    assert_eq!(h.events.count("audio_track"), 2);
    assert_eq!(h.events.count("video_track"), 1);
    assert_eq!(h.transport.offers().len(), 2);
}

#[tokio::test]
async fn test_failed_add_remote_track_is_withdrawn() {
    let h = harness(ClientRole::Subscriber).await;
    h.subscribe().await;
    h.events.wait_for_name("audio_track", WAIT).await.unwrap();

    h.transport.fail_next_negotiation("no free transceiver");
    assert!(h.client.add_remote_track(TrackKind::Audio));
    h.events.wait_for_name("signaling_error", WAIT).await.unwrap();
    assert_eq!(h.client.state(), SessionState::Subscribing);

    assert!(h.client.add_remote_track(TrackKind::Video));
    let event = h
        .events
        .wait_for(WAIT, |e| matches!(e, ClientEvent::VideoTrack { mid, .. } if mid.as_str() == "2"))
        .await;
    assert!(event.is_some(), "requested video never arrived");

    // The failed audio request is not asked for again
    let offers = h.transport.offers();
    assert_eq!(offers.len(), 3);
    assert_eq!(offers[2].receive, vec![TrackKind::Video, TrackKind::Audio, TrackKind::Video]);
    assert_eq!(h.events.count("audio_track"), 1);
}

#[tokio::test]
async fn test_publisher_ignores_source_announcements() {
    let h = harness(ClientRole::Publisher).await;
    h.connect().await;
    announce(&h, Some("camA"));
    h.transport.emit(TransportEvent::Stopped);
    h.transport.emit(TransportEvent::ViewersActive);
    h.events.wait_for_name("viewers_active", WAIT).await.unwrap();

    assert_eq!(h.events.count("active"), 0);
    assert_eq!(h.events.count("stopped"), 0);
    assert!(h.client.active_sources().is_empty());
}
