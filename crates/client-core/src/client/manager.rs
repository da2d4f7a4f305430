//! Session state machine
//!
//! [`ClientManager`] owns one signaling session at a time and drives it
//! through [`SessionState`]. Public requests validate synchronously, return
//! whether they were accepted, and complete in background tasks that report
//! through the listener.
//!
//! # Connection epochs
//!
//! Every connect, disconnect, transport drop and terminal failure moves the
//! connection epoch forward while the state lock is held. Background work captures the epoch it
//! was started under and discards its result once the epoch has moved on, so a
//! late handshake, negotiation or transport event from a previous session
//! never touches the current one.
//!
//! # Lock order
//!
//! `state` before `registry` before `projections`. The remaining locks are
//! leaves. State transitions and the events they produce are queued while the
//! state lock is held, which keeps delivery in transition order.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::cleanup::{self, ClientLease};
use crate::client::config::{ClientConfig, ClientOptions, ConnectionOptions};
use crate::client::dispatch::{DeliveryGate, EventDispatcher};
use crate::client::frames::{FrameMetadataPipeline, TransformableFrameHandler};
use crate::client::projection::LayerProjectionTable;
use crate::client::recording::RecordingControl;
use crate::client::recovery::{retry_with_backoff_or_wake, with_timeout};
use crate::client::registry::TrackRegistry;
use crate::client::types::{ClientRole, SessionInfo, SessionState, StateChangeInfo};
use crate::credentials::Credentials;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, ClientEventHandler};
use crate::layer::SourceEntry;
use crate::signaling::{HandshakeRequest, SessionOffer, SignalingCommand, SignalingTransport, TransportEvent};
use crate::stats::StatsGate;
use crate::track::{Mid, Track, TrackKind};

/// How the current session was opened, kept for reconnecting
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) request: HandshakeRequest,
    pub(crate) options: ConnectionOptions,
}

/// A session whose reconnect gave up on a network failure. A
/// reachability signal picks it up again.
#[derive(Debug, Clone)]
struct ParkedSession {
    context: ConnectionContext,
    role_options: Option<ClientOptions>,
    resume: SessionState,
}

pub(crate) struct ClientInner {
    pub(crate) id: String,
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn SignalingTransport>,
    pub(crate) runtime: Handle,

    pub(crate) state: RwLock<SessionState>,
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) credentials: RwLock<Option<Credentials>>,
    pub(crate) connection: RwLock<Option<ConnectionContext>>,
    parked: Mutex<Option<ParkedSession>>,
    /// Wakes a reconnect that is sleeping between attempts
    network_restored: Notify,

    /// Options set through the legacy setters
    pub(crate) stored_options: RwLock<ClientOptions>,
    /// Effective options of the running publish/subscribe session
    pub(crate) role_options: RwLock<Option<ClientOptions>>,
    /// Epoch that owns the in-flight publish/subscribe negotiation
    pub(crate) negotiation: Mutex<Option<u64>>,
    /// Serializes every negotiation with the transport
    pub(crate) renegotiation: tokio::sync::Mutex<()>,

    pub(crate) registry: RwLock<TrackRegistry>,
    pub(crate) projections: RwLock<LayerProjectionTable>,
    pub(crate) recording: RecordingControl,
    pub(crate) frames: Arc<FrameMetadataPipeline>,
    pub(crate) stats: Arc<StatsGate>,
    pub(crate) events: EventDispatcher,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A publish or subscribe client
///
/// Built with [`ClientBuilder`](crate::ClientBuilder). Dropping the last
/// handle cancels background work and closes the transport.
pub struct ClientManager {
    pub(crate) inner: Arc<ClientInner>,
    _lease: ClientLease,
}

impl ClientManager {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<dyn SignalingTransport>,
        handler: Option<Arc<dyn ClientEventHandler>>,
        frame_handler: Option<Arc<dyn TransformableFrameHandler>>,
        credentials: Option<Credentials>,
        client_id: Option<String>,
    ) -> ClientResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            ClientError::invalid_configuration("runtime", "clients must be built inside a Tokio runtime")
        })?;
        config.validate()?;
        if let Some(credentials) = &credentials {
            credentials.validate(config.role)?;
        }
        let lease = ClientLease::acquire()?;

        let id = client_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let epoch = Arc::new(AtomicU64::new(0));
        let stats = Arc::new(StatsGate::new());
        stats.set_interval(config.options.stats_interval());

        let events = EventDispatcher::start(&runtime, id.clone(), handler, epoch.clone(), stats.clone());
        let frames = Arc::new(FrameMetadataPipeline::new(events.sender(), frame_handler));

        info!(client_id = %id, role = %config.role, "Client created");

        let inner = Arc::new(ClientInner {
            id,
            stored_options: RwLock::new(config.options.clone()),
            config,
            transport,
            runtime,
            state: RwLock::new(SessionState::Disconnected),
            epoch,
            credentials: RwLock::new(credentials),
            connection: RwLock::new(None),
            parked: Mutex::new(None),
            network_restored: Notify::new(),
            role_options: RwLock::new(None),
            negotiation: Mutex::new(None),
            renegotiation: tokio::sync::Mutex::new(()),
            registry: RwLock::new(TrackRegistry::new()),
            projections: RwLock::new(LayerProjectionTable::new()),
            recording: RecordingControl::new(),
            frames,
            stats,
            events,
            tasks: Mutex::new(Vec::new()),
        });

        Ok(Self { inner, _lease: lease })
    }

    // ===== IDENTITY AND STATE =====

    pub fn client_id(&self) -> &str {
        &self.inner.id
    }

    pub fn role(&self) -> ClientRole {
        self.inner.role()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_publishing(&self) -> bool {
        self.state() == SessionState::Publishing
    }

    pub fn is_subscribed(&self) -> bool {
        self.state() == SessionState::Subscribing
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state() == SessionState::Reconnecting
    }

    /// Snapshot of the session, taken under the session locks
    pub fn session_info(&self) -> SessionInfo {
        let inner = &self.inner;
        let state = inner.state.read();
        let registry = inner.registry.read();
        let projections = inner.projections.read();
        SessionInfo {
            client_id: inner.id.clone(),
            role: inner.role(),
            state: *state,
            local_tracks: registry.local_tracks().len(),
            remote_tracks: registry.remote_tracks().len(),
            projections: projections.projection_count(),
            active_sources: projections.source_count(),
            recording: inner.recording.state(),
            stats_enabled: inner.stats.is_enabled(),
            frame_transformer_enabled: inner.frames.is_enabled(),
        }
    }

    // ===== CREDENTIALS AND OPTIONS =====

    /// Replace the credentials used by `connect`. Only allowed while
    /// disconnected.
    pub fn set_credentials(&self, credentials: Credentials) -> ClientResult<()> {
        let inner = &self.inner;
        credentials.validate(inner.role())?;

        let state = inner.state.read();
        if *state != SessionState::Disconnected {
            return Err(ClientError::invalid_state("set_credentials", *state));
        }
        *inner.credentials.write() = Some(credentials);
        *inner.parked.lock() = None;
        debug!(client_id = %inner.id, "Credentials updated");
        Ok(())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.inner.credentials.read().clone()
    }

    /// Store default options for the next publish or subscribe.
    ///
    /// Options passed to `publish_with_options`/`subscribe_with_options` take
    /// precedence over these.
    pub fn set_options(&self, options: ClientOptions) -> bool {
        if let Err(e) = options.validate() {
            warn!(client_id = %self.inner.id, error = %e, "Rejecting invalid options");
            return false;
        }
        self.inner.stats.set_interval(options.stats_interval());
        *self.inner.stored_options.write() = options;
        true
    }

    /// Options stored through `set_options` and the legacy setters
    pub fn options(&self) -> ClientOptions {
        self.inner.stored_options.read().clone()
    }

    // ===== CONNECTION =====

    /// Open signaling through the director API with the stored credentials
    pub fn connect(&self) -> bool {
        self.connect_with_options(self.inner.config.connection)
    }

    pub fn connect_with_options(&self, options: ConnectionOptions) -> bool {
        let inner = &self.inner;
        let credentials = match inner.credentials.read().clone() {
            Some(credentials) => credentials,
            None => {
                warn!(client_id = %inner.id, "connect rejected, no credentials set");
                return false;
            }
        };
        if let Err(e) = credentials.validate(inner.role()) {
            warn!(client_id = %inner.id, error = %e, "connect rejected");
            return false;
        }

        let request = HandshakeRequest::Director { role: inner.role(), credentials };
        inner.begin_connect(request, options)
    }

    /// Open signaling straight to a known websocket endpoint, skipping the
    /// director lookup
    pub fn connect_with_data(&self, ws_url: &str, jwt: &str, options: ConnectionOptions) -> bool {
        let inner = &self.inner;
        match Url::parse(ws_url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => {
                warn!(client_id = %inner.id, scheme = url.scheme(), "connect rejected, websocket url required");
                return false;
            }
            Err(e) => {
                warn!(client_id = %inner.id, error = %e, "connect rejected, malformed websocket url");
                return false;
            }
        }
        if jwt.trim().is_empty() {
            warn!(client_id = %inner.id, "connect rejected, empty token");
            return false;
        }

        let request = HandshakeRequest::Direct {
            role: inner.role(),
            ws_url: ws_url.to_string(),
            jwt: jwt.to_string(),
        };
        inner.begin_connect(request, options)
    }

    /// Tear the session down from any state but `Disconnected` and
    /// `Disconnecting`
    pub fn disconnect(&self) -> bool {
        self.inner.disconnect()
    }

    /// Tell the client the network is reachable again.
    ///
    /// A reconnect waiting out its backoff tries again at once. A session
    /// whose reconnect gave up on a network failure is reconnected and its
    /// publish or subscribe re-run. Returns false when there is nothing to
    /// recover.
    pub fn network_available(&self) -> bool {
        self.inner.network_available()
    }

    // ===== LISTENERS =====

    /// Install or replace the listener. Events already queued go to the new
    /// listener.
    pub fn set_event_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        self.inner.events.set_handler(handler);
    }

    pub fn clear_event_handler(&self) {
        self.inner.events.clear_handler();
    }

    /// Receive every event delivered to the listener, in the same order
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    // ===== STATS AND FRAMES =====

    /// Turn periodic stats reports on or off. Turning them off also drops
    /// reports that are queued but not yet delivered.
    pub fn enable_stats(&self, enable: bool) {
        debug!(client_id = %self.inner.id, enable, "Stats reporting");
        self.inner.stats.set_enabled(enable);
    }

    pub fn is_stats_enabled(&self) -> bool {
        self.inner.stats.is_enabled()
    }

    /// Turn the frame metadata pipeline on or off
    pub fn enable_frame_transformer(&self, enable: bool) {
        debug!(client_id = %self.inner.id, enable, "Frame transformer");
        self.inner.frames.set_enabled(enable);
    }

    pub fn set_frame_handler(&self, handler: Option<Arc<dyn TransformableFrameHandler>>) {
        self.inner.frames.set_handler(handler);
    }

    /// Pipeline the transport calls for every encoded frame
    pub fn frame_pipeline(&self) -> Arc<FrameMetadataPipeline> {
        self.inner.frames.clone()
    }

    // ===== TRACKS =====

    /// Transceiver mid bound to a track by the latest negotiation
    pub fn get_mid(&self, track_id: &str) -> Option<Mid> {
        self.inner.registry.read().get_mid(track_id)
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        let inner = &self.inner;
        let was_open = {
            let state = inner.state.read();
            inner.bump_epoch();
            *state != SessionState::Disconnected
        };
        inner.abort_tasks();
        if was_open {
            let transport = inner.transport.clone();
            let timeout = inner.config.shutdown_timeout;
            inner.runtime.spawn(async move {
                if let Err(e) = with_timeout("close", timeout, transport.close()).await {
                    warn!(error = %e, "Failed to close transport of dropped client");
                }
            });
        }
        inner.events.shutdown();
        debug!(client_id = %inner.id, "Client dropped");
    }
}

impl ClientInner {
    pub(crate) fn role(&self) -> ClientRole {
        self.config.role
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn require_role(&self, role: ClientRole, operation: &str) -> bool {
        if self.role() != role {
            warn!(
                client_id = %self.id,
                operation,
                required = %role,
                "Operation not available for this role"
            );
            return false;
        }
        true
    }

    /// Move to `next` and queue the state change. Caller holds the state
    /// write lock.
    pub(crate) fn transition(&self, state: &mut SessionState, next: SessionState) {
        let previous = *state;
        if previous == next {
            return;
        }
        *state = next;
        debug!(client_id = %self.id, from = %previous, to = %next, "State transition");
        self.events.emit(ClientEvent::StateChanged {
            info: StateChangeInfo { previous, current: next, timestamp: Utc::now() },
        });
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn abort_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Forget everything tied to the session. Caller holds the state write
    /// lock.
    fn reset_session(&self) {
        self.registry.write().reset();
        self.projections.write().clear();
        self.stats.invalidate();
        self.recording.reset();
        *self.negotiation.lock() = None;
        *self.role_options.write() = None;
        *self.connection.write() = None;
    }

    // ===== CONNECT / DISCONNECT =====

    fn begin_connect(self: &Arc<Self>, request: HandshakeRequest, options: ConnectionOptions) -> bool {
        if cleanup::is_torn_down() {
            warn!(client_id = %self.id, "connect rejected, process resources torn down");
            return false;
        }

        let epoch = {
            let mut state = self.state.write();
            if *state != SessionState::Disconnected {
                warn!(client_id = %self.id, state = %*state, "connect rejected, session already open");
                return false;
            }
            let epoch = self.bump_epoch();
            *self.parked.lock() = None;
            *self.connection.write() = Some(ConnectionContext { request: request.clone(), options });
            self.transition(&mut state, SessionState::Connecting);
            epoch
        };

        info!(
            client_id = %self.id,
            endpoint = request.endpoint(),
            auto_reconnect = options.auto_reconnect,
            "Connecting"
        );
        let inner = self.clone();
        self.spawn(async move { inner.run_handshake(epoch, request).await });
        true
    }

    async fn run_handshake(self: Arc<Self>, epoch: u64, request: HandshakeRequest) {
        let result = self.transport.handshake(&request).await;

        let mut state = self.state.write();
        if !self.is_current(epoch) || *state != SessionState::Connecting {
            debug!(client_id = %self.id, "Discarding handshake result from a previous attempt");
            return;
        }

        match result {
            Ok(session) => {
                info!(client_id = %self.id, "Connected");
                self.transition(&mut state, SessionState::Connected);
                self.events.emit(ClientEvent::Connected);
                self.start_event_pump(epoch, session.events);
            }
            Err(failure) => {
                warn!(
                    client_id = %self.id,
                    status = failure.status,
                    reason = %failure.reason,
                    "Connection failed"
                );
                self.bump_epoch();
                self.transition(&mut state, SessionState::Disconnected);
                *self.connection.write() = None;
                self.events.emit(ClientEvent::ConnectionError {
                    status: failure.status,
                    reason: failure.reason,
                });
            }
        }
    }

    pub(crate) fn disconnect(self: &Arc<Self>) -> bool {
        let (prior, epoch) = {
            let mut state = self.state.write();
            let prior = *state;
            if self.parked.lock().take().is_some() {
                debug!(client_id = %self.id, "Dropping parked session");
            }
            if matches!(prior, SessionState::Disconnected | SessionState::Disconnecting) {
                debug!(client_id = %self.id, state = %prior, "disconnect ignored");
                return false;
            }
            let epoch = self.bump_epoch();
            self.transition(&mut state, SessionState::Disconnecting);
            self.reset_session();
            (prior, epoch)
        };

        info!(client_id = %self.id, from = %prior, "Disconnecting");
        self.abort_tasks();

        let inner = self.clone();
        let timeout = self.config.shutdown_timeout;
        self.spawn(async move {
            if let Err(e) = with_timeout("close", timeout, inner.transport.close()).await {
                warn!(client_id = %inner.id, error = %e, "Transport close failed");
            }

            let mut state = inner.state.write();
            if !inner.is_current(epoch) || *state != SessionState::Disconnecting {
                return;
            }
            inner.transition(&mut state, SessionState::Disconnected);
            if prior.is_connected() {
                inner.events.emit(ClientEvent::Disconnected);
            }
            info!(client_id = %inner.id, "Disconnected");
        });
        true
    }

    // ===== TRANSPORT EVENTS =====

    fn start_event_pump(self: &Arc<Self>, epoch: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let inner = self.clone();
        self.spawn(async move {
            loop {
                let event = events.recv().await;
                if !inner.is_current(epoch) {
                    break;
                }
                let keep_going = match event {
                    Some(event) => inner.handle_transport_event(epoch, event),
                    None => {
                        inner.on_transport_dropped(epoch, "signaling channel closed");
                        false
                    }
                };
                if !keep_going {
                    break;
                }
            }
            debug!(client_id = %inner.id, epoch, "Transport event pump finished");
        });
    }

    /// Returns false once the connection is gone
    fn handle_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) -> bool {
        let role = self.role();
        match event {
            TransportEvent::TransportDropped { reason } => {
                self.on_transport_dropped(epoch, &reason);
                return false;
            }
            TransportEvent::ActiveSource { stream_id, track_ids, source_id } => {
                if role != ClientRole::Subscriber {
                    debug!(client_id = %self.id, "Ignoring source announcement on a publisher");
                    return true;
                }
                let state = self.state.read();
                if !matches!(*state, SessionState::Connected | SessionState::Subscribing) {
                    return true;
                }
                info!(client_id = %self.id, stream_id = %stream_id, source_id = ?source_id, "Source active");
                self.projections
                    .write()
                    .upsert_source(SourceEntry::new(&stream_id, &track_ids, source_id.clone()));
                self.events.emit(ClientEvent::SourceActive { stream_id, track_ids, source_id });
                let subscribed = *state == SessionState::Subscribing;
                drop(state);
                if subscribed {
                    self.restore_pending_projections(epoch);
                }
            }
            TransportEvent::InactiveSource { stream_id, source_id } => {
                if role != ClientRole::Subscriber {
                    return true;
                }
                let state = self.state.read();
                if !matches!(*state, SessionState::Connected | SessionState::Subscribing) {
                    return true;
                }
                let dropped = self.projections.write().remove_source(&source_id);
                info!(
                    client_id = %self.id,
                    stream_id = %stream_id,
                    source_id = ?source_id,
                    dropped_projections = dropped.len(),
                    "Source inactive"
                );
                self.events.emit(ClientEvent::SourceInactive { stream_id, source_id });
            }
            TransportEvent::ViewersActive => self.emit_viewer_presence(ClientEvent::ViewersActive),
            TransportEvent::ViewersInactive => self.emit_viewer_presence(ClientEvent::ViewersInactive),
            TransportEvent::Stopped => {
                if role != ClientRole::Subscriber {
                    debug!(client_id = %self.id, "Ignoring stream stop on a publisher");
                    return true;
                }
                let state = self.state.read();
                if state.is_connected() {
                    info!(client_id = %self.id, "Stream stopped");
                    self.events.emit(ClientEvent::Stopped);
                }
            }
            TransportEvent::Vad { mid, source_id } => {
                if role == ClientRole::Subscriber && *self.state.read() == SessionState::Subscribing {
                    self.events.emit(ClientEvent::Vad { mid, source_id });
                }
            }
            TransportEvent::LayersChanged { mid, active, inactive } => {
                if role != ClientRole::Subscriber {
                    return true;
                }
                let state = self.state.read();
                if *state != SessionState::Subscribing {
                    return true;
                }
                self.projections
                    .write()
                    .record_layers(mid.clone(), active.clone(), inactive.clone());
                self.events.emit(ClientEvent::Layers { mid, active, inactive });
            }
            TransportEvent::ViewerCountChanged(count) => {
                let state = self.state.read();
                if state.is_connected() {
                    self.events
                        .emit_gated(ClientEvent::ViewerCount { count }, DeliveryGate::Connection(epoch));
                }
            }
            TransportEvent::StatsSample(report) => {
                let state = self.state.read();
                if !state.is_connected() {
                    return true;
                }
                if let Some(ticket) = self.stats.admit(Instant::now()) {
                    self.events
                        .emit_gated(ClientEvent::StatsReport { report }, DeliveryGate::Stats(ticket));
                }
            }
            TransportEvent::SignalingError(message) => {
                warn!(client_id = %self.id, message = %message, "Signaling error");
                self.events.emit(ClientEvent::SignalingError { message });
            }
        }
        true
    }

    fn emit_viewer_presence(&self, event: ClientEvent) {
        if self.role() != ClientRole::Publisher {
            return;
        }
        let state = self.state.read();
        if state.is_connected() {
            self.events.emit(event);
        }
    }

    fn on_transport_dropped(self: &Arc<Self>, epoch: u64, reason: &str) {
        let mut state = self.state.write();
        if !self.is_current(epoch) {
            return;
        }
        let prior = *state;
        if !prior.is_established() {
            debug!(client_id = %self.id, state = %prior, "Ignoring transport drop");
            return;
        }

        warn!(client_id = %self.id, state = %prior, reason, "Transport dropped");
        self.registry.write().invalidate_session();
        self.projections.write().park();
        self.stats.invalidate();
        self.recording.reset();
        let in_flight = self.negotiation.lock().take() == Some(epoch);

        let auto_reconnect = self
            .connection
            .read()
            .as_ref()
            .map_or(false, |c| c.options.auto_reconnect);

        if auto_reconnect {
            // Work started on the dropped connection must not land on the next one
            let next = self.bump_epoch();
            let resume = match (prior, in_flight, self.role()) {
                (SessionState::Connected, true, ClientRole::Publisher) => SessionState::Publishing,
                (SessionState::Connected, true, ClientRole::Subscriber) => SessionState::Subscribing,
                _ => prior,
            };
            self.transition(&mut state, SessionState::Reconnecting);
            self.events.emit(ClientEvent::Disconnected);
            drop(state);

            let inner = self.clone();
            self.spawn(async move { inner.reconnect(next, resume).await });
        } else {
            self.bump_epoch();
            self.transition(&mut state, SessionState::Disconnected);
            self.events.emit(ClientEvent::Disconnected);
            self.reset_session();
            drop(state);

            let inner = self.clone();
            let timeout = self.config.shutdown_timeout;
            self.spawn(async move {
                if let Err(e) = with_timeout("close", timeout, inner.transport.close()).await {
                    warn!(client_id = %inner.id, error = %e, "Transport close failed");
                }
            });
        }
    }

    /// Handshake again under `epoch`, then re-run the media session that
    /// `resume` names
    async fn reconnect(self: Arc<Self>, epoch: u64, resume: SessionState) {
        let request = match self.connection.read().as_ref() {
            Some(context) => context.request.clone(),
            None => return,
        };
        info!(
            client_id = %self.id,
            max_attempts = self.config.reconnect.max_attempts,
            "Reconnecting"
        );

        let transport = self.transport.clone();
        let result = retry_with_backoff_or_wake(
            "reconnect",
            self.config.reconnect.clone(),
            &self.network_restored,
            || {
                let transport = transport.clone();
                let request = request.clone();
                let inner = self.clone();
                async move {
                    if !inner.is_current(epoch) {
                        return Err(ClientError::cancelled("reconnect"));
                    }
                    transport.handshake(&request).await.map_err(ClientError::from)
                }
            },
        )
        .await;

        let mut state = self.state.write();
        if !self.is_current(epoch) || *state != SessionState::Reconnecting {
            debug!(client_id = %self.id, "Reconnect superseded");
            return;
        }

        match result {
            Ok(session) => {
                info!(client_id = %self.id, "Reconnected");
                self.transition(&mut state, SessionState::Connected);
                self.events.emit(ClientEvent::Connected);
                self.start_event_pump(epoch, session.events);
                self.reestablish(epoch, resume);
            }
            Err(e) => {
                error!(client_id = %self.id, error = %e, "Reconnect gave up");
                let (status, reason) = e.status_and_reason();
                self.bump_epoch();
                self.transition(&mut state, SessionState::Disconnected);
                if e.is_recoverable() {
                    if let Some(context) = self.connection.read().clone() {
                        let role_options = self.role_options.read().clone();
                        *self.parked.lock() = Some(ParkedSession { context, role_options, resume });
                    }
                }
                self.reset_session();
                self.events.emit(ClientEvent::ConnectionError { status, reason });
            }
        }
    }

    /// Re-run the media session that was up, or being negotiated, before
    /// the drop. Caller holds the state write lock.
    fn reestablish(self: &Arc<Self>, epoch: u64, resume: SessionState) {
        let Some(options) = self.role_options.read().clone() else {
            return;
        };
        if !matches!(resume, SessionState::Publishing | SessionState::Subscribing) {
            return;
        }

        *self.negotiation.lock() = Some(epoch);
        let inner = self.clone();
        match resume {
            SessionState::Publishing => {
                self.spawn(async move { inner.run_publish(epoch, options, true).await });
            }
            _ => {
                self.spawn(async move { inner.run_subscribe(epoch, options, true).await });
            }
        }
    }

    pub(crate) fn network_available(self: &Arc<Self>) -> bool {
        let mut state = self.state.write();
        match *state {
            SessionState::Reconnecting => {
                info!(client_id = %self.id, "Network available, retrying now");
                self.network_restored.notify_waiters();
                true
            }
            SessionState::Disconnected => {
                if cleanup::is_torn_down() {
                    return false;
                }
                let Some(parked) = self.parked.lock().take() else {
                    return false;
                };
                info!(
                    client_id = %self.id,
                    endpoint = parked.context.request.endpoint(),
                    resume = %parked.resume,
                    "Network available, resuming session"
                );
                let epoch = self.bump_epoch();
                *self.connection.write() = Some(parked.context);
                *self.role_options.write() = parked.role_options;
                self.transition(&mut state, SessionState::Reconnecting);
                drop(state);

                let inner = self.clone();
                let resume = parked.resume;
                self.spawn(async move { inner.reconnect(epoch, resume).await });
                true
            }
            _ => false,
        }
    }

    // ===== NEGOTIATION =====

    /// Claim the publish/subscribe slot for the current connection
    pub(crate) fn begin_negotiation(&self, operation: &str) -> Option<u64> {
        let state = self.state.read();
        if *state != SessionState::Connected {
            warn!(client_id = %self.id, state = %*state, "{} rejected, not connected", operation);
            return None;
        }
        let epoch = self.current_epoch();
        let mut slot = self.negotiation.lock();
        if *slot == Some(epoch) {
            warn!(client_id = %self.id, "{} rejected, negotiation already in progress", operation);
            return None;
        }
        *slot = Some(epoch);
        Some(epoch)
    }

    /// Release the slot. Caller holds the state lock.
    pub(crate) fn end_negotiation(&self, epoch: u64) {
        let mut slot = self.negotiation.lock();
        if *slot == Some(epoch) {
            *slot = None;
        }
    }

    pub(crate) fn build_offer(&self, options: ClientOptions) -> SessionOffer {
        let role = self.role();
        let registry = self.registry.read();
        let (tracks, receive) = match role {
            ClientRole::Publisher => (registry.local_offers(), Vec::new()),
            ClientRole::Subscriber => (
                Vec::new(),
                registry.receive_plan(options.disable_audio, options.multiplexed_audio_track_count),
            ),
        };
        SessionOffer { role, tracks, receive, options, frames: self.frames.clone() }
    }

    /// Renegotiate the running media session after a track change.
    ///
    /// `requested` is an inbound transceiver asked for by this change; it is
    /// withdrawn again if the negotiation fails.
    pub(crate) fn schedule_renegotiation(
        self: &Arc<Self>,
        epoch: u64,
        reason: &'static str,
        requested: Option<TrackKind>,
    ) {
        let inner = self.clone();
        self.spawn(async move { inner.renegotiate(epoch, reason, requested).await });
    }

    async fn renegotiate(self: Arc<Self>, epoch: u64, reason: &'static str, requested: Option<TrackKind>) {
        let _guard = self.renegotiation.lock().await;
        if !self.is_current(epoch) {
            return;
        }

        let role = self.role();
        let options = self
            .role_options
            .read()
            .clone()
            .unwrap_or_else(|| self.stored_options.read().effective_for(role));
        debug!(client_id = %self.id, reason, "Renegotiating");
        let result = self.transport.negotiate(self.build_offer(options)).await;

        let state = self.state.read();
        if !self.is_current(epoch) || !matches!(*state, SessionState::Publishing | SessionState::Subscribing) {
            return;
        }

        match result {
            Ok(answer) => match role {
                ClientRole::Publisher => {
                    self.registry.write().apply_local_answer(&answer.transceivers);
                }
                ClientRole::Subscriber => {
                    let registry_added = {
                        let mut registry = self.registry.write();
                        let added = registry.apply_remote_answer(&answer.transceivers);
                        self.projections
                            .write()
                            .retain_mids(|mid| registry.transceiver_kind(mid).is_some());
                        added
                    };
                    for (track, mid) in registry_added {
                        self.emit_track(track, mid);
                    }
                }
            },
            Err(e) => {
                warn!(client_id = %self.id, reason, error = %e, "Renegotiation failed");
                if let Some(kind) = requested {
                    self.registry.write().withdraw_remote_request(kind);
                }
                self.events.emit(ClientEvent::SignalingError { message: e.to_string() });
            }
        }
        drop(state);
    }

    pub(crate) fn emit_track(&self, track: Arc<Track>, mid: Mid) {
        let event = match track.kind() {
            TrackKind::Video => ClientEvent::VideoTrack { track, mid },
            TrackKind::Audio => ClientEvent::AudioTrack { track, mid },
        };
        self.events.emit(event);
    }

    /// Send a command, reporting failure as a signaling error
    pub(crate) fn send_command_reporting(self: &Arc<Self>, epoch: u64, command: SignalingCommand) {
        let inner = self.clone();
        self.spawn(async move {
            let name = command.name();
            if let Err(e) = inner.transport.send_command(command).await {
                if inner.is_current(epoch) {
                    warn!(client_id = %inner.id, command = name, error = %e, "Command failed");
                    inner.events.emit(ClientEvent::SignalingError { message: e.to_string() });
                }
            }
        });
    }
}
