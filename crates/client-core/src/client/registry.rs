//! Track registry: local and remote tracks and their transceiver bindings
//!
//! The registry is plain data; the client wraps it in a lock and is the only
//! writer. A track has at most one mid, a mid carries at most one track, and
//! bindings only ever reflect the latest negotiation answer, so a lookup never
//! returns a mid from a previous session.

use std::collections::HashMap;
use std::sync::Arc;

use crate::signaling::{NegotiatedTransceiver, TrackOffer};
use crate::track::{Mid, Track, TrackKind};

#[derive(Debug, Clone)]
struct Binding {
    track_id: String,
    kind: TrackKind,
}

#[derive(Debug, Default)]
pub(crate) struct TrackRegistry {
    local: Vec<Arc<Track>>,
    remote: HashMap<String, Arc<Track>>,
    mids: HashMap<String, Mid>,
    transceivers: HashMap<Mid, Binding>,
    /// Extra inbound transceivers requested through `add_remote_track`
    remote_requests: Vec<TrackKind>,
}

impl TrackRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a local track, replacing any track with the same id in place
    pub(crate) fn add_local(&mut self, track: Arc<Track>) -> bool {
        match self.local.iter_mut().find(|t| t.id() == track.id()) {
            Some(existing) => {
                *existing = track;
                true
            }
            None => {
                self.local.push(track);
                false
            }
        }
    }

    /// Remove every local track and its binding. Returns how many were removed.
    pub(crate) fn clear_local(&mut self) -> usize {
        let removed: Vec<Arc<Track>> = self.local.drain(..).collect();
        for track in &removed {
            self.unbind_track(track.id());
        }
        removed.len()
    }

    pub(crate) fn local_tracks(&self) -> Vec<Arc<Track>> {
        self.local.clone()
    }

    pub(crate) fn local_offers(&self) -> Vec<TrackOffer> {
        self.local
            .iter()
            .map(|t| TrackOffer { track_id: t.id().to_string(), kind: t.kind() })
            .collect()
    }

    pub(crate) fn remote_tracks(&self) -> Vec<Arc<Track>> {
        self.remote.values().cloned().collect()
    }

    pub(crate) fn request_remote(&mut self, kind: TrackKind) {
        self.remote_requests.push(kind);
    }

    /// Undo the latest request for `kind`. Returns false if there was none.
    pub(crate) fn withdraw_remote_request(&mut self, kind: TrackKind) -> bool {
        match self.remote_requests.iter().rposition(|k| *k == kind) {
            Some(index) => {
                self.remote_requests.remove(index);
                true
            }
            None => false,
        }
    }

    /// Inbound transceivers to ask for: one video, one audio unless audio is
    /// disabled, the multiplexed audio slots, then explicit requests in order.
    pub(crate) fn receive_plan(&self, disable_audio: bool, multiplexed_audio: u32) -> Vec<TrackKind> {
        let mut plan = vec![TrackKind::Video];
        if !disable_audio {
            plan.push(TrackKind::Audio);
            plan.extend(std::iter::repeat(TrackKind::Audio).take(multiplexed_audio as usize));
        }
        plan.extend(self.remote_requests.iter().copied());
        plan
    }

    pub(crate) fn get_mid(&self, track_id: &str) -> Option<Mid> {
        self.mids.get(track_id).cloned()
    }

    pub(crate) fn transceiver_kind(&self, mid: &Mid) -> Option<TrackKind> {
        self.transceivers.get(mid).map(|b| b.kind)
    }

    pub(crate) fn track_for_mid(&self, mid: &Mid) -> Option<String> {
        self.transceivers.get(mid).map(|b| b.track_id.clone())
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.transceivers.len()
    }

    fn bind(&mut self, track_id: &str, kind: TrackKind, mid: Mid) {
        self.unbind_track(track_id);
        if let Some(previous) = self.transceivers.remove(&mid) {
            self.mids.remove(&previous.track_id);
        }
        self.mids.insert(track_id.to_string(), mid.clone());
        self.transceivers.insert(mid, Binding { track_id: track_id.to_string(), kind });
    }

    fn unbind_track(&mut self, track_id: &str) {
        if let Some(mid) = self.mids.remove(track_id) {
            self.transceivers.remove(&mid);
        }
    }

    /// Replace local bindings with a publish answer. Answer entries for
    /// tracks that are no longer registered are ignored.
    pub(crate) fn apply_local_answer(&mut self, transceivers: &[NegotiatedTransceiver]) {
        let local_ids: Vec<String> = self.local.iter().map(|t| t.id().to_string()).collect();
        for id in &local_ids {
            self.unbind_track(id);
        }
        for t in transceivers {
            if local_ids.iter().any(|id| *id == t.track_id) {
                self.bind(&t.track_id, t.kind, t.mid.clone());
            }
        }
    }

    /// Reconcile remote tracks with a subscribe answer.
    ///
    /// Mids absent from the answer lose their track. Returns the tracks that
    /// are new to the caller, in answer order.
    pub(crate) fn apply_remote_answer(&mut self, transceivers: &[NegotiatedTransceiver]) -> Vec<(Arc<Track>, Mid)> {
        let stale: Vec<String> = self
            .remote
            .keys()
            .filter(|id| {
                !transceivers
                    .iter()
                    .any(|t| t.track_id == **id && self.mids.get(*id) == Some(&t.mid))
            })
            .cloned()
            .collect();
        for id in stale {
            self.remote.remove(&id);
            self.unbind_track(&id);
        }

        let mut added = Vec::new();
        for t in transceivers {
            if self.remote.contains_key(&t.track_id) {
                continue;
            }
            let track = Arc::new(Track::remote(t.track_id.clone(), t.kind));
            self.bind(&t.track_id, t.kind, t.mid.clone());
            self.remote.insert(t.track_id.clone(), track.clone());
            added.push((track, t.mid.clone()));
        }
        added
    }

    /// Forget everything tied to the negotiated media session. Local tracks
    /// and remote track requests survive so the session can be rebuilt.
    pub(crate) fn invalidate_session(&mut self) {
        self.mids.clear();
        self.transceivers.clear();
        self.remote.clear();
    }

    /// Forget the session and the remote requests made during it
    pub(crate) fn reset(&mut self) {
        self.invalidate_session();
        self.remote_requests.clear();
    }
}
