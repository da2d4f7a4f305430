//! Signaling and media transport collaborator interface
//!
//! The client never speaks a wire protocol itself. It drives an
//! implementation of [`SignalingTransport`] through four requests (handshake,
//! negotiate, send a command, close) and consumes the per-connection stream of
//! [`TransportEvent`]s returned by a successful handshake. Retry and timeout
//! policy for a single request belongs to the transport; the client owns the
//! backoff between reconnect attempts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::config::ClientOptions;
use crate::client::frames::FrameMetadataPipeline;
use crate::client::types::ClientRole;
use crate::credentials::Credentials;
use crate::error::{ClientError, ClientResult};
use crate::layer::{LayerData, ProjectionData};
use crate::stats::StatsReport;
use crate::track::{Mid, TrackKind};

/// Where and as whom to open signaling
#[derive(Clone)]
pub enum HandshakeRequest {
    /// Resolve the signaling endpoint through the director API
    Director {
        role: ClientRole,
        credentials: Credentials,
    },
    /// Connect straight to a known signaling endpoint
    Direct {
        role: ClientRole,
        ws_url: String,
        jwt: String,
    },
}

impl HandshakeRequest {
    pub fn role(&self) -> ClientRole {
        match self {
            HandshakeRequest::Director { role, .. } | HandshakeRequest::Direct { role, .. } => *role,
        }
    }

    /// Endpoint the handshake goes to, for logging
    pub fn endpoint(&self) -> &str {
        match self {
            HandshakeRequest::Director { credentials, .. } => &credentials.api_url,
            HandshakeRequest::Direct { ws_url, .. } => ws_url,
        }
    }
}

impl fmt::Debug for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeRequest::Director { role, credentials } => f
                .debug_struct("Director")
                .field("role", role)
                .field("credentials", credentials)
                .finish(),
            HandshakeRequest::Direct { role, ws_url, .. } => f
                .debug_struct("Direct")
                .field("role", role)
                .field("ws_url", ws_url)
                .field("jwt", &"<redacted>")
                .finish(),
        }
    }
}

/// Handshake rejection as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub status: i32,
    pub reason: String,
}

impl HandshakeFailure {
    pub fn new(status: i32, reason: impl Into<String>) -> Self {
        Self { status, reason: reason.into() }
    }
}

impl From<HandshakeFailure> for ClientError {
    fn from(failure: HandshakeFailure) -> Self {
        ClientError::connection_failed(failure.status, failure.reason)
    }
}

/// An open signaling connection
#[derive(Debug)]
pub struct SignalingSession {
    /// Events for this connection only. A closed channel counts as a drop.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SignalingSession {
    pub fn new(events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { events }
    }
}

/// Local track offered for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffer {
    pub track_id: String,
    pub kind: TrackKind,
}

/// Media session description handed to the transport for (re)negotiation
#[derive(Debug, Clone)]
pub struct SessionOffer {
    pub role: ClientRole,
    /// Local tracks to send, in registration order (publish)
    pub tracks: Vec<TrackOffer>,
    /// Inbound transceivers to open, in order (subscribe)
    pub receive: Vec<TrackKind>,
    /// Options already reduced to the ones meaningful for `role`
    pub options: ClientOptions,
    pub frames: Arc<FrameMetadataPipeline>,
}

/// Transceiver produced by a negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedTransceiver {
    pub mid: Mid,
    pub kind: TrackKind,
    /// Local track sent on it, or the id of the remote track it receives
    pub track_id: String,
}

impl NegotiatedTransceiver {
    pub fn new(mid: impl Into<Mid>, kind: TrackKind, track_id: impl Into<String>) -> Self {
        Self { mid: mid.into(), kind, track_id: track_id.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAnswer {
    pub transceivers: Vec<NegotiatedTransceiver>,
}

/// Requests carried over an established signaling connection
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingCommand {
    Project {
        source_id: Option<String>,
        mappings: Vec<ProjectionData>,
    },
    Unproject {
        mids: Vec<Mid>,
    },
    Select {
        layer: Option<LayerData>,
    },
    StartRecording,
    StopRecording,
}

impl SignalingCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SignalingCommand::Project { .. } => "project",
            SignalingCommand::Unproject { .. } => "unproject",
            SignalingCommand::Select { .. } => "select",
            SignalingCommand::StartRecording => "record",
            SignalingCommand::StopRecording => "unrecord",
        }
    }
}

/// Notifications from the server or the media transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ActiveSource {
        stream_id: String,
        track_ids: Vec<String>,
        source_id: Option<String>,
    },
    InactiveSource {
        stream_id: String,
        source_id: Option<String>,
    },
    ViewersActive,
    ViewersInactive,
    Stopped,
    Vad {
        mid: Mid,
        source_id: Option<String>,
    },
    LayersChanged {
        mid: Mid,
        active: Vec<LayerData>,
        inactive: Vec<LayerData>,
    },
    ViewerCountChanged(u32),
    StatsSample(StatsReport),
    SignalingError(String),
    TransportDropped {
        reason: String,
    },
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open signaling. Failures carry the server status (0 when unreachable).
    async fn handshake(&self, request: &HandshakeRequest) -> Result<SignalingSession, HandshakeFailure>;

    /// Negotiate or renegotiate the media session
    async fn negotiate(&self, offer: SessionOffer) -> ClientResult<SessionAnswer>;

    async fn send_command(&self, command: SignalingCommand) -> ClientResult<()>;

    /// Close media and signaling. Must be safe to call when nothing is open.
    async fn close(&self) -> ClientResult<()>;
}
