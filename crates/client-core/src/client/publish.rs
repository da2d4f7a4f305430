//! Publish operations for the client-core library
//!
//! Local track registration, publishing, and the legacy option setters
//! that only make sense on a publisher.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cleanup;
use crate::client::config::{resolve_options, ClientOptions, ScalabilityMode};
use crate::client::manager::{ClientInner, ClientManager};
use crate::client::types::{ClientRole, SessionState};
use crate::events::ClientEvent;
use crate::track::{Track, TrackDirection};

impl ClientManager {
    /// Publish the registered local tracks with the stored options
    pub fn publish(&self) -> bool {
        self.publish_with_options(None)
    }

    /// Publish the registered local tracks.
    ///
    /// Requires a connected publisher with at least one local track and no
    /// other publish in flight. The outcome arrives as `on_publishing` or
    /// `on_publishing_error`.
    pub fn publish_with_options(&self, options: Option<ClientOptions>) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Publisher, "publish") {
            return false;
        }

        let options = resolve_options(&inner.stored_options.read(), options).effective_for(ClientRole::Publisher);
        if let Err(e) = options.validate() {
            warn!(client_id = %inner.id, error = %e, "publish rejected");
            return false;
        }
        if inner.registry.read().local_tracks().is_empty() {
            warn!(client_id = %inner.id, "publish rejected, no local tracks");
            return false;
        }

        let Some(epoch) = inner.begin_negotiation("publish") else {
            return false;
        };
        *inner.role_options.write() = Some(options.clone());

        info!(client_id = %inner.id, "Publishing");
        let task_inner = inner.clone();
        inner.spawn(async move { task_inner.run_publish(epoch, options, false).await });
        true
    }

    /// Stop publishing. Same as `disconnect`.
    pub fn unpublish(&self) -> bool {
        if !self.inner.require_role(ClientRole::Publisher, "unpublish") {
            return false;
        }
        self.inner.disconnect()
    }

    /// Register a local track for the next publish.
    ///
    /// A track whose id is already registered replaces the old one.
    /// Rejected while publishing and after process teardown.
    pub fn add_track(&self, track: Track) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Publisher, "add_track") {
            return false;
        }
        if cleanup::is_torn_down() {
            warn!(client_id = %inner.id, "add_track rejected, process resources torn down");
            return false;
        }
        if track.direction() != TrackDirection::Local {
            warn!(client_id = %inner.id, track_id = track.id(), "add_track rejected, not a local track");
            return false;
        }

        let state = inner.state.read();
        if matches!(*state, SessionState::Publishing | SessionState::Disconnecting) {
            warn!(client_id = %inner.id, state = %*state, "add_track rejected");
            return false;
        }
        let track_id = track.id().to_string();
        let kind = track.kind();
        let replaced = inner.registry.write().add_local(Arc::new(track));
        drop(state);

        debug!(client_id = %inner.id, track_id = %track_id, kind = %kind, replaced, "Local track registered");
        true
    }

    /// Remove every local track. A running publish is renegotiated.
    pub fn clear_tracks(&self) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Publisher, "clear_tracks") {
            return false;
        }

        let state = inner.state.read();
        if *state == SessionState::Disconnecting {
            return false;
        }
        let removed = inner.registry.write().clear_local();
        let publishing = *state == SessionState::Publishing;
        let epoch = inner.current_epoch();
        drop(state);

        debug!(client_id = %inner.id, removed, "Local tracks cleared");
        if publishing {
            inner.schedule_renegotiation(epoch, "clear_tracks", None);
        }
        true
    }

    pub fn local_tracks(&self) -> Vec<Arc<Track>> {
        self.inner.registry.read().local_tracks()
    }

    /// Legacy setter, applies to the next publish
    pub fn enable_simulcast(&self, enable: bool) -> bool {
        self.update_publish_options("enable_simulcast", |options| options.simulcast = enable)
    }

    /// Legacy setter, applies to the next publish
    pub fn enable_svc(&self, mode: ScalabilityMode) -> bool {
        self.update_publish_options("enable_svc", |options| options.scalability_mode = Some(mode))
    }

    /// Legacy setter, applies to the next publish
    pub fn disable_svc(&self) -> bool {
        self.update_publish_options("disable_svc", |options| options.scalability_mode = None)
    }

    fn update_publish_options(&self, operation: &str, update: impl FnOnce(&mut ClientOptions)) -> bool {
        if !self.inner.require_role(ClientRole::Publisher, operation) {
            return false;
        }
        update(&mut self.inner.stored_options.write());
        debug!(client_id = %self.inner.id, operation, "Stored publish options updated");
        true
    }
}

impl ClientInner {
    pub(crate) async fn run_publish(self: Arc<Self>, epoch: u64, options: ClientOptions, reestablish: bool) {
        self.stats.set_interval(options.stats_interval());
        let record = options.record_on_publish;

        let result = {
            let _guard = self.renegotiation.lock().await;
            let offer = self.build_offer(options);
            self.transport.negotiate(offer).await
        };

        let mut state = self.state.write();
        if !self.is_current(epoch) || *state != SessionState::Connected {
            debug!(client_id = %self.id, "Discarding publish answer from a previous session");
            return;
        }
        self.end_negotiation(epoch);

        match result {
            Ok(answer) => {
                self.registry.write().apply_local_answer(&answer.transceivers);
                info!(client_id = %self.id, reestablish, "Publishing started");
                self.transition(&mut state, SessionState::Publishing);
                self.events.emit(ClientEvent::Publishing);
                drop(state);

                if record {
                    self.request_recording(epoch, true);
                }
            }
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Publish failed");
                self.events.emit(ClientEvent::PublishingError { reason: e.to_string() });
            }
        }
    }
}
