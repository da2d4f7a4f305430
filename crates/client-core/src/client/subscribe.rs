//! Subscribe operations for the client-core library

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::config::{resolve_options, ClientOptions};
use crate::client::manager::{ClientInner, ClientManager};
use crate::client::types::{ClientRole, SessionState};
use crate::events::ClientEvent;
use crate::signaling::SignalingCommand;
use crate::track::{Track, TrackKind};

impl ClientManager {
    /// Subscribe with the stored options
    pub fn subscribe(&self) -> bool {
        self.subscribe_with_options(None)
    }

    /// Start receiving the stream.
    ///
    /// Requires a connected subscriber with no other subscribe in flight. On
    /// success `on_subscribed` is followed by one track event per negotiated
    /// inbound transceiver.
    pub fn subscribe_with_options(&self, options: Option<ClientOptions>) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Subscriber, "subscribe") {
            return false;
        }

        let options = resolve_options(&inner.stored_options.read(), options).effective_for(ClientRole::Subscriber);
        if let Err(e) = options.validate() {
            warn!(client_id = %inner.id, error = %e, "subscribe rejected");
            return false;
        }

        let Some(epoch) = inner.begin_negotiation("subscribe") else {
            return false;
        };
        *inner.role_options.write() = Some(options.clone());

        info!(client_id = %inner.id, "Subscribing");
        let task_inner = inner.clone();
        inner.spawn(async move { task_inner.run_subscribe(epoch, options, false).await });
        true
    }

    /// Stop receiving. Same as `disconnect`.
    pub fn unsubscribe(&self) -> bool {
        if !self.inner.require_role(ClientRole::Subscriber, "unsubscribe") {
            return false;
        }
        self.inner.disconnect()
    }

    /// Open one more inbound transceiver of `kind` on the running
    /// subscription. The new track arrives as a track event.
    pub fn add_remote_track(&self, kind: TrackKind) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Subscriber, "add_remote_track") {
            return false;
        }

        let state = inner.state.read();
        if *state != SessionState::Subscribing {
            warn!(client_id = %inner.id, state = %*state, "add_remote_track rejected, not subscribed");
            return false;
        }
        inner.registry.write().request_remote(kind);
        let epoch = inner.current_epoch();
        drop(state);

        debug!(client_id = %inner.id, kind = %kind, "Requesting remote track");
        inner.schedule_renegotiation(epoch, "add_remote_track", Some(kind));
        true
    }

    pub fn remote_tracks(&self) -> Vec<Arc<Track>> {
        self.inner.registry.read().remote_tracks()
    }
}

impl ClientInner {
    pub(crate) async fn run_subscribe(self: Arc<Self>, epoch: u64, options: ClientOptions, reestablish: bool) {
        self.stats.set_interval(options.stats_interval());

        let result = {
            let _guard = self.renegotiation.lock().await;
            let offer = self.build_offer(options);
            self.transport.negotiate(offer).await
        };

        let mut state = self.state.write();
        if !self.is_current(epoch) || *state != SessionState::Connected {
            debug!(client_id = %self.id, "Discarding subscribe answer from a previous session");
            return;
        }
        self.end_negotiation(epoch);

        match result {
            Ok(answer) => {
                let added = self.registry.write().apply_remote_answer(&answer.transceivers);
                info!(client_id = %self.id, tracks = added.len(), reestablish, "Subscribed");
                self.transition(&mut state, SessionState::Subscribing);
                self.events.emit(ClientEvent::Subscribed);
                for (track, mid) in added {
                    self.emit_track(track, mid);
                }
                drop(state);

                if reestablish {
                    self.restore_pending_projections(epoch);
                    let preference = self.projections.read().preference();
                    if preference.is_some() {
                        self.send_command_reporting(epoch, SignalingCommand::Select { layer: preference });
                    }
                }
            }
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Subscribe failed");
                self.events.emit(ClientEvent::SubscribedError { reason: e.to_string() });
            }
        }
    }
}
