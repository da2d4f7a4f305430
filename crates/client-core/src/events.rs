//! Event handling system for client-core
//!
//! Everything a client reports asynchronously arrives as a [`ClientEvent`].
//! Applications either implement [`ClientEventHandler`] and install it on the
//! builder, or call `subscribe_events()` for a broadcast receiver of the same
//! stream. Both see events in one well-defined order per client.
//!
//! # Implementing a listener
//!
//! Every callback has a no-op default, so a listener only overrides what it
//! cares about:
//!
//! ```rust
//! use async_trait::async_trait;
//! use rtstream_client_core::events::ClientEventHandler;
//!
//! struct ConnectionLogger;
//!
//! #[async_trait]
//! impl ClientEventHandler for ConnectionLogger {
//!     async fn on_connected(&self) {
//!         println!("signaling up");
//!     }
//!
//!     async fn on_connection_error(&self, status: i32, reason: String) {
//!         println!("connect failed with {}: {}", status, reason);
//!     }
//! }
//! ```
//!
//! # Event priorities
//!
//! Lifecycle failures are `Critical`, lifecycle transitions `High`, media
//! topology changes `Normal`, and periodic samples `Low`. Priorities are
//! informational; delivery order is always queue order.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::client::frames::FrameInfo;
use crate::client::types::StateChangeInfo;
use crate::layer::LayerData;
use crate::stats::StatsReport;
use crate::track::{Mid, Track};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged { info: StateChangeInfo },

    Connected,
    Disconnected,
    ConnectionError { status: i32, reason: String },
    SignalingError { message: String },

    StatsReport { report: StatsReport },
    ViewerCount { count: u32 },

    Publishing,
    PublishingError { reason: String },
    /// First viewer joined a published stream
    ViewersActive,
    /// Last viewer left a published stream
    ViewersInactive,

    Subscribed,
    SubscribedError { reason: String },
    SourceActive {
        stream_id: String,
        track_ids: Vec<String>,
        source_id: Option<String>,
    },
    SourceInactive {
        stream_id: String,
        source_id: Option<String>,
    },
    Stopped,
    Vad { mid: Mid, source_id: Option<String> },
    Layers {
        mid: Mid,
        active: Vec<LayerData>,
        inactive: Vec<LayerData>,
    },
    VideoTrack { track: Arc<Track>, mid: Mid },
    AudioTrack { track: Arc<Track>, mid: Mid },
    FrameMetadata { frame: FrameInfo, metadata: Bytes },

    RecordingStarted,
    RecordingStartFailed { reason: String },
    RecordingStopped,
    RecordingStopFailed { reason: String },
}

impl ClientEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::ConnectionError { .. }
            | ClientEvent::PublishingError { .. }
            | ClientEvent::SubscribedError { .. }
            | ClientEvent::Disconnected => EventPriority::Critical,

            ClientEvent::StateChanged { .. }
            | ClientEvent::Connected
            | ClientEvent::Publishing
            | ClientEvent::Subscribed
            | ClientEvent::SignalingError { .. }
            | ClientEvent::Stopped
            | ClientEvent::RecordingStartFailed { .. }
            | ClientEvent::RecordingStopFailed { .. } => EventPriority::High,

            ClientEvent::SourceActive { .. }
            | ClientEvent::SourceInactive { .. }
            | ClientEvent::ViewersActive
            | ClientEvent::ViewersInactive
            | ClientEvent::Layers { .. }
            | ClientEvent::VideoTrack { .. }
            | ClientEvent::AudioTrack { .. }
            | ClientEvent::RecordingStarted
            | ClientEvent::RecordingStopped => EventPriority::Normal,

            ClientEvent::StatsReport { .. }
            | ClientEvent::ViewerCount { .. }
            | ClientEvent::Vad { .. }
            | ClientEvent::FrameMetadata { .. } => EventPriority::Low,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StateChanged { .. } => "state_changed",
            ClientEvent::Connected => "connected",
            ClientEvent::Disconnected => "disconnected",
            ClientEvent::ConnectionError { .. } => "connection_error",
            ClientEvent::SignalingError { .. } => "signaling_error",
            ClientEvent::StatsReport { .. } => "stats_report",
            ClientEvent::ViewerCount { .. } => "viewer_count",
            ClientEvent::Publishing => "publishing",
            ClientEvent::PublishingError { .. } => "publishing_error",
            ClientEvent::ViewersActive => "viewers_active",
            ClientEvent::ViewersInactive => "viewers_inactive",
            ClientEvent::Subscribed => "subscribed",
            ClientEvent::SubscribedError { .. } => "subscribed_error",
            ClientEvent::SourceActive { .. } => "active",
            ClientEvent::SourceInactive { .. } => "inactive",
            ClientEvent::Stopped => "stopped",
            ClientEvent::Vad { .. } => "vad",
            ClientEvent::Layers { .. } => "layers",
            ClientEvent::VideoTrack { .. } => "video_track",
            ClientEvent::AudioTrack { .. } => "audio_track",
            ClientEvent::FrameMetadata { .. } => "frame_metadata",
            ClientEvent::RecordingStarted => "recording_started",
            ClientEvent::RecordingStartFailed { .. } => "recording_start_failed",
            ClientEvent::RecordingStopped => "recording_stopped",
            ClientEvent::RecordingStopFailed { .. } => "recording_stop_failed",
        }
    }
}

/// Listener for client events.
///
/// Callbacks for one client run strictly one after another on the client's
/// dispatcher task. Long-running work should be spawned rather than awaited
/// inline, since it delays every later event.
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    async fn on_state_changed(&self, _info: StateChangeInfo) {}

    async fn on_connected(&self) {}

    async fn on_disconnected(&self) {}

    async fn on_connection_error(&self, _status: i32, _reason: String) {}

    async fn on_signaling_error(&self, _message: String) {}

    async fn on_stats_report(&self, _report: StatsReport) {}

    async fn on_viewer_count(&self, _count: u32) {}

    async fn on_publishing(&self) {}

    async fn on_publishing_error(&self, _reason: String) {}

    async fn on_viewers_active(&self) {}

    async fn on_viewers_inactive(&self) {}

    async fn on_subscribed(&self) {}

    async fn on_subscribed_error(&self, _reason: String) {}

    async fn on_active(&self, _stream_id: String, _track_ids: Vec<String>, _source_id: Option<String>) {}

    async fn on_inactive(&self, _stream_id: String, _source_id: Option<String>) {}

    async fn on_stopped(&self) {}

    async fn on_vad(&self, _mid: Mid, _source_id: Option<String>) {}

    async fn on_layers(&self, _mid: Mid, _active: Vec<LayerData>, _inactive: Vec<LayerData>) {}

    async fn on_video_track(&self, _track: Arc<Track>, _mid: Mid) {}

    async fn on_audio_track(&self, _track: Arc<Track>, _mid: Mid) {}

    async fn on_frame_metadata(&self, _frame: FrameInfo, _metadata: Bytes) {}

    async fn on_recording_started(&self) {}

    async fn on_recording_start_failed(&self, _reason: String) {}

    async fn on_recording_stopped(&self) {}

    async fn on_recording_stop_failed(&self, _reason: String) {}

    async fn on_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::StateChanged { info } => self.on_state_changed(info).await,
            ClientEvent::Connected => self.on_connected().await,
            ClientEvent::Disconnected => self.on_disconnected().await,
            ClientEvent::ConnectionError { status, reason } => {
                self.on_connection_error(status, reason).await
            }
            ClientEvent::SignalingError { message } => self.on_signaling_error(message).await,
            ClientEvent::StatsReport { report } => self.on_stats_report(report).await,
            ClientEvent::ViewerCount { count } => self.on_viewer_count(count).await,
            ClientEvent::Publishing => self.on_publishing().await,
            ClientEvent::PublishingError { reason } => self.on_publishing_error(reason).await,
            ClientEvent::ViewersActive => self.on_viewers_active().await,
            ClientEvent::ViewersInactive => self.on_viewers_inactive().await,
            ClientEvent::Subscribed => self.on_subscribed().await,
            ClientEvent::SubscribedError { reason } => self.on_subscribed_error(reason).await,
            ClientEvent::SourceActive { stream_id, track_ids, source_id } => {
                self.on_active(stream_id, track_ids, source_id).await
            }
            ClientEvent::SourceInactive { stream_id, source_id } => {
                self.on_inactive(stream_id, source_id).await
            }
            ClientEvent::Stopped => self.on_stopped().await,
            ClientEvent::Vad { mid, source_id } => self.on_vad(mid, source_id).await,
            ClientEvent::Layers { mid, active, inactive } => {
                self.on_layers(mid, active, inactive).await
            }
            ClientEvent::VideoTrack { track, mid } => self.on_video_track(track, mid).await,
            ClientEvent::AudioTrack { track, mid } => self.on_audio_track(track, mid).await,
            ClientEvent::FrameMetadata { frame, metadata } => {
                self.on_frame_metadata(frame, metadata).await
            }
            ClientEvent::RecordingStarted => self.on_recording_started().await,
            ClientEvent::RecordingStartFailed { reason } => {
                self.on_recording_start_failed(reason).await
            }
            ClientEvent::RecordingStopped => self.on_recording_stopped().await,
            ClientEvent::RecordingStopFailed { reason } => {
                self.on_recording_stop_failed(reason).await
            }
        }
    }
}
