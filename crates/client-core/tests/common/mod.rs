#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rtstream_client_core::testing::{MockTransport, RecordingHandler};
use rtstream_client_core::{
    Client, ClientBuilder, ClientRole, ConnectionOptions, Credentials, ReconnectPolicy, SessionState,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rtstream_client_core=debug")
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub client: Arc<Client>,
    pub transport: Arc<MockTransport>,
    pub events: Arc<RecordingHandler>,
}

/// Reconnect quickly and deterministically
pub fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        backoff_multiplier: 2.0,
        use_jitter: false,
    }
}

pub async fn harness(role: ClientRole) -> Harness {
    harness_with(role, ConnectionOptions::default()).await
}

pub async fn harness_with(role: ClientRole, connection: ConnectionOptions) -> Harness {
    harness_with_policy(role, connection, fast_reconnect(3)).await
}

pub async fn harness_with_policy(role: ClientRole, connection: ConnectionOptions, policy: ReconnectPolicy) -> Harness {
    init_tracing();
    let transport = MockTransport::new();
    let events = RecordingHandler::new();
    let credentials = match role {
        ClientRole::Publisher => Credentials::publisher("myStream", "publish-token"),
        ClientRole::Subscriber => Credentials::subscriber("myStream", "k9Mwad"),
    };
    let client = ClientBuilder::new(role)
        .transport(transport.clone())
        .event_handler(events.clone())
        .credentials(credentials)
        .connection_options(connection)
        .reconnect_policy(policy)
        .build()
        .await
        .expect("client should build");
    Harness { client, transport, events }
}

impl Harness {
    pub async fn connect(&self) {
        assert!(self.client.connect());
        assert!(self.events.wait_for_name("connected", WAIT).await.is_some(), "never connected");
        assert_eq!(self.client.state(), SessionState::Connected);
    }

    pub async fn subscribe(&self) {
        self.connect().await;
        assert!(self.client.subscribe());
        assert!(self.events.wait_for_name("subscribed", WAIT).await.is_some(), "never subscribed");
    }

    pub async fn wait_for_state(&self, state: SessionState) {
        tokio::time::timeout(WAIT, async {
            while self.client.state() != state {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("client never reached {}", state));
    }

    /// Wait until the mock has seen `count` commands
    pub async fn wait_for_commands(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.transport.commands().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("commands were never sent");
    }

    /// Let queued tasks and events settle
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
}
