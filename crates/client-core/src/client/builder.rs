//! Client builder for creating publish and subscribe clients
//!
//! The builder collects a [`ClientConfig`], the signaling transport and the
//! optional listener, frame handler and credentials, then produces a
//! [`ClientManager`]. The client's role is fixed here and never changes.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use rtstream_client_core::{ClientBuilder, ClientOptions, Credentials};
//! use rtstream_client_core::testing::MockTransport;
//!
//! # tokio_test::block_on(async {
//! let client = ClientBuilder::subscriber()
//!     .transport(MockTransport::new())
//!     .credentials(Credentials::subscriber("myStream", "k9Mwad"))
//!     .options(ClientOptions::new().with_stats_interval(Duration::from_millis(500)))
//!     .build()
//!     .await
//!     .expect("Failed to build client");
//!
//! assert!(client.connect());
//! # })
//! ```
//!
//! A transport is mandatory:
//!
//! ```rust
//! use rtstream_client_core::ClientBuilder;
//!
//! # tokio_test::block_on(async {
//! assert!(ClientBuilder::publisher().build().await.is_err());
//! # })
//! ```

use std::sync::Arc;

use crate::client::config::{ClientConfig, ClientOptions, ConnectionOptions};
use crate::client::frames::TransformableFrameHandler;
use crate::client::manager::ClientManager;
use crate::client::recovery::ReconnectPolicy;
use crate::client::types::ClientRole;
use crate::credentials::Credentials;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEventHandler;
use crate::signaling::SignalingTransport;

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn SignalingTransport>>,
    event_handler: Option<Arc<dyn ClientEventHandler>>,
    frame_handler: Option<Arc<dyn TransformableFrameHandler>>,
    credentials: Option<Credentials>,
    client_id: Option<String>,
}

impl ClientBuilder {
    pub fn new(role: ClientRole) -> Self {
        Self::from_config(ClientConfig::new(role))
    }

    pub fn publisher() -> Self {
        Self::new(ClientRole::Publisher)
    }

    pub fn subscriber() -> Self {
        Self::new(ClientRole::Subscriber)
    }

    /// Start from a complete configuration, e.g. one loaded with
    /// [`ClientConfig::from_json`]
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            event_handler: None,
            frame_handler: None,
            credentials: None,
            client_id: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn ClientEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn frame_handler(mut self, handler: Arc<dyn TransformableFrameHandler>) -> Self {
        self.frame_handler = Some(handler);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Default publish/subscribe options
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Connection options used by `connect()`
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.config.connection = options;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Identifier used in logs; a UUID is generated when unset
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Build the client on the current Tokio runtime.
    ///
    /// Fails when no transport was given, when the configuration or
    /// credentials are invalid, or after process-wide cleanup.
    pub async fn build(self) -> ClientResult<Arc<ClientManager>> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::invalid_configuration("transport", "a signaling transport is required"))?;

        let client = ClientManager::new(
            self.config,
            transport,
            self.event_handler,
            self.frame_handler,
            self.credentials,
            self.client_id,
        )?;
        Ok(Arc::new(client))
    }
}
