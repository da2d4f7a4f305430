//! Media track handles and transceiver identifiers
//!
//! A [`Track`] is an opaque `(id, kind)` handle. Local tracks come from the
//! capture side and are only referenced here; remote tracks are created by the
//! client when a negotiation answer binds a new inbound transceiver, and are
//! shared with the caller through `on_video_track` / `on_audio_track`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(TrackKind::Audio),
            "video" => Ok(TrackKind::Video),
            other => Err(ClientError::invalid_configuration(
                "media",
                format!("unknown track kind '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackDirection {
    Local,
    Remote,
}

/// Transceiver media id, stable within one negotiated session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mid(String);

impl Mid {
    pub fn new(mid: impl Into<String>) -> Self {
        Self(mid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Mid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Mid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A media track handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Track {
    id: String,
    kind: TrackKind,
    direction: TrackDirection,
}

impl Track {
    /// Wrap a capture-side track for publishing
    pub fn local(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind, direction: TrackDirection::Local }
    }

    pub(crate) fn remote(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind, direction: TrackDirection::Remote }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn direction(&self) -> TrackDirection {
        self.direction
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }
}
