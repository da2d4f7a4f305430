//! # rtstream-client-core
//!
//! Control plane of a real-time media publish/subscribe client.
//!
//! A [`Client`] is built for one role, publisher or subscriber, and drives a
//! single signaling session through connect, publish or subscribe, and
//! disconnect, reconnecting with backoff after network loss. Subscribers keep
//! track of the sources the server announces and decide which source track
//! and which simulcast/SVC layer is projected onto each local transceiver.
//! Publishers can ask the server to record. Everything asynchronous is
//! reported through a [`ClientEventHandler`] in a well-defined order.
//!
//! The wire protocol and media engine live behind [`SignalingTransport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use rtstream_client_core::{ClientBuilder, Credentials, SessionState, Track, TrackKind};
//! use rtstream_client_core::testing::{MockTransport, RecordingHandler};
//!
//! # tokio_test::block_on(async {
//! let events = RecordingHandler::new();
//! let client = ClientBuilder::publisher()
//!     .transport(MockTransport::new())
//!     .event_handler(events.clone())
//!     .credentials(Credentials::publisher("myStream", "publishing-token"))
//!     .build()
//!     .await?;
//!
//! client.add_track(Track::local("camera", TrackKind::Video));
//! assert!(client.connect());
//! assert!(events.wait_for_name("connected", Duration::from_secs(1)).await.is_some());
//!
//! assert!(client.publish());
//! assert!(events.wait_for_name("publishing", Duration::from_secs(1)).await.is_some());
//! assert_eq!(client.state(), SessionState::Publishing);
//! # Ok::<(), rtstream_client_core::ClientError>(())
//! # });
//! ```

pub mod cleanup;
pub mod client;
pub mod credentials;
pub mod error;
pub mod events;
pub mod layer;
pub mod logging;
pub mod signaling;
pub mod stats;
pub mod testing;
pub mod track;

// Public API exports
pub use cleanup::cleanup;
pub use client::{
    Client, ClientBuilder, ClientConfig, ClientManager, ClientOptions, ClientRole, ConnectionOptions, FrameInfo,
    Projection, ReconnectPolicy, RecordingState, SessionInfo, SessionState, StateChangeInfo,
    TransformableFrameHandler,
};
pub use credentials::Credentials;
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, ClientEventHandler, EventPriority};
pub use layer::{LayerData, LayerSnapshot, ProjectionData, SourceEntry, VideoQuality, NO_TEMPORAL_LAYERS};
pub use logging::{setup_logging, LoggingConfig};
pub use signaling::{
    HandshakeFailure, HandshakeRequest, SessionAnswer, SessionOffer, SignalingCommand, SignalingSession,
    SignalingTransport, TransportEvent,
};
pub use stats::{StatsReport, StreamingStatistics};
pub use track::{Mid, Track, TrackDirection, TrackKind};

/// Client-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
