//! Type definitions for the client-core library
//!
//! Session-level enums and snapshots shared by the state machine, the event
//! layer and callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::recording::RecordingState;

// ===== CORE CLIENT TYPES =====

/// Which side of a stream a client works on. Fixed when the client is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Publisher,
    Subscriber,
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRole::Publisher => write!(f, "publisher"),
            ClientRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Lifecycle state of a client session.
///
/// Exactly one state is current per client. The media role states
/// (`Publishing`, `Subscribing`) are only ever entered from `Connected`, and
/// leaving them always passes through `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
    Subscribing,
    Reconnecting,
    Disconnecting,
}

impl SessionState {
    /// Signaling is up, whether or not a media session is running
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Publishing | SessionState::Subscribing
        )
    }

    /// States from which a transport drop is meaningful
    pub(crate) fn is_established(&self) -> bool {
        self.is_connected()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Publishing => "Publishing",
            SessionState::Subscribing => "Subscribing",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// A state transition, as delivered to `on_state_changed`
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeInfo {
    pub previous: SessionState,
    pub current: SessionState,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of a client, taken under the session locks
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub client_id: String,
    pub role: ClientRole,
    pub state: SessionState,
    pub local_tracks: usize,
    pub remote_tracks: usize,
    pub projections: usize,
    pub active_sources: usize,
    pub recording: RecordingState,
    pub stats_enabled: bool,
    pub frame_transformer_enabled: bool,
}
