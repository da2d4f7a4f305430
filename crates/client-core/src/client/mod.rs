//! Publish/subscribe client implementation
//!
//! # Architecture Overview
//!
//! - **`manager`** - The ClientManager session state machine, connect and disconnect, reconnection
//! - **`publish`** - Local tracks, publishing, legacy publish option setters
//! - **`subscribe`** - Subscribing and extra inbound tracks
//! - **`projection`** - Source bookkeeping, projection, layer selection
//! - **`recording`** - Server-side recording substate of a publisher
//! - **`frames`** - Encoded-frame metadata pipeline
//! - **`config`** - Options, connection options and client configuration
//! - **`recovery`** - Backoff and timeout helpers
//!
//! # Usage Guide
//!
//! ```rust,no_run
//! # use rtstream_client_core::{ClientBuilder, ClientEvent, Credentials, ProjectionData, TrackKind};
//! # use rtstream_client_core::testing::MockTransport;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::subscriber()
//!     .transport(MockTransport::new())
//!     .credentials(Credentials::subscriber("myStream", "k9Mwad"))
//!     .build()
//!     .await?;
//!
//! let mut events = client.subscribe_events();
//! client.connect();
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Connected => {
//!             client.subscribe();
//!         }
//!         ClientEvent::SourceActive { source_id, track_ids, .. } => {
//!             if let Some(mid) = client.get_mid("video0") {
//!                 client.project(
//!                     source_id.as_deref(),
//!                     vec![ProjectionData::new("video", TrackKind::Video, mid)],
//!                 );
//!             }
//!         }
//!         ClientEvent::ConnectionError { status, reason } => {
//!             eprintln!("connect failed ({}): {}", status, reason);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod frames;
pub mod manager;
pub mod projection;
pub mod publish;
pub mod recording;
pub mod recovery;
pub mod subscribe;
pub mod types;

pub(crate) mod dispatch;
pub(crate) mod registry;


pub use builder::ClientBuilder;
pub use config::{
    BitrateSettings, ClientConfig, ClientOptions, ConnectionOptions, DegradationPreference, OptionScope,
    ScalabilityMode,
};
pub use frames::{FrameInfo, FrameMetadataPipeline, TransformableFrameHandler};
pub use manager::ClientManager;
pub use projection::Projection;
pub use recording::RecordingState;
pub use recovery::{retry_with_backoff, retry_with_backoff_or_wake, with_timeout, ReconnectPolicy, RetryConfig};
pub use types::{ClientRole, SessionInfo, SessionState, StateChangeInfo};

// Type alias for convenient use
pub type Client = ClientManager;
