//! Layer projection table and the subscribe-side projection requests
//!
//! The table tracks which remote sources are active, which source track is
//! projected onto which local transceiver, the latest layer announcement for
//! each mid, and the caller's layer preference for the default projection.
//! Projections are committed locally when a request is accepted and rolled
//! back if the server rejects it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::manager::{ClientInner, ClientManager};
use crate::client::types::{ClientRole, SessionState};
use crate::events::ClientEvent;
use crate::layer::{LayerData, LayerSnapshot, ProjectionData, SourceEntry, VideoQuality};
use crate::signaling::SignalingCommand;
use crate::track::Mid;

/// A committed projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub source_id: Option<String>,
    pub data: ProjectionData,
}

#[derive(Debug, Default)]
pub(crate) struct LayerProjectionTable {
    sources: HashMap<Option<String>, SourceEntry>,
    projections: BTreeMap<Mid, Projection>,
    /// Projections parked by a transport drop, waiting for their source
    pending: Vec<Projection>,
    layers: HashMap<Mid, LayerSnapshot>,
    preferred_layer: Option<LayerData>,
}

impl LayerProjectionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upsert_source(&mut self, entry: SourceEntry) {
        self.sources.insert(entry.source_id.clone(), entry);
    }

    /// Delete a source and every projection that references it
    pub(crate) fn remove_source(&mut self, source_id: &Option<String>) -> Vec<Mid> {
        self.sources.remove(source_id);
        self.pending.retain(|p| p.source_id != *source_id);

        let mids: Vec<Mid> = self
            .projections
            .iter()
            .filter(|(_, p)| p.source_id == *source_id)
            .map(|(mid, _)| mid.clone())
            .collect();
        for mid in &mids {
            self.projections.remove(mid);
        }
        mids
    }

    pub(crate) fn is_source_active(&self, source_id: Option<&str>) -> bool {
        self.sources.contains_key(&source_id.map(str::to_string))
    }

    pub(crate) fn sources(&self) -> Vec<SourceEntry> {
        self.sources.values().cloned().collect()
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Commit projections; a mid already projected is rebound
    pub(crate) fn insert(&mut self, source_id: Option<String>, data: &[ProjectionData]) {
        for entry in data {
            self.projections.insert(
                entry.mid.clone(),
                Projection { source_id: source_id.clone(), data: entry.clone() },
            );
        }
    }

    /// Remove projections for the given mids, returning the ones that existed
    pub(crate) fn remove(&mut self, mids: &[Mid]) -> Vec<Mid> {
        mids.iter()
            .filter(|mid| self.projections.remove(*mid).is_some())
            .cloned()
            .collect()
    }

    /// Roll back a rejected request, leaving later rebinds alone
    pub(crate) fn rollback(&mut self, source_id: &Option<String>, data: &[ProjectionData]) {
        for entry in data {
            let matches = self
                .projections
                .get(&entry.mid)
                .map_or(false, |p| p.source_id == *source_id && p.data == *entry);
            if matches {
                self.projections.remove(&entry.mid);
            }
        }
    }

    pub(crate) fn retain_mids(&mut self, mut keep: impl FnMut(&Mid) -> bool) {
        self.projections.retain(|mid, _| keep(mid));
        self.layers.retain(|mid, _| keep(mid));
    }

    pub(crate) fn projections(&self) -> Vec<Projection> {
        self.projections.values().cloned().collect()
    }

    pub(crate) fn projection_count(&self) -> usize {
        self.projections.len()
    }

    pub(crate) fn record_layers(&mut self, mid: Mid, active: Vec<LayerData>, inactive: Vec<LayerData>) {
        self.layers.insert(mid, LayerSnapshot { active, inactive });
    }

    pub(crate) fn layers(&self, mid: &Mid) -> Option<LayerSnapshot> {
        self.layers.get(mid).cloned()
    }

    pub(crate) fn set_preference(&mut self, layer: Option<LayerData>) {
        self.preferred_layer = layer;
    }

    pub(crate) fn preference(&self) -> Option<LayerData> {
        self.preferred_layer.clone()
    }

    /// Session lost: sources and layers are gone, projections wait for
    /// their sources to come back
    pub(crate) fn park(&mut self) {
        let parked = std::mem::take(&mut self.projections);
        self.pending.extend(parked.into_values());
        self.sources.clear();
        self.layers.clear();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Move parked projections whose source is active again back into the
    /// table. Entries that `valid` rejects are discarded; entries whose
    /// source is still missing stay parked. Returns what was restored,
    /// grouped by source.
    pub(crate) fn take_restorable(
        &mut self,
        mut valid: impl FnMut(&ProjectionData) -> bool,
    ) -> Vec<(Option<String>, Vec<ProjectionData>)> {
        let pending = std::mem::take(&mut self.pending);
        let mut restored: Vec<(Option<String>, Vec<ProjectionData>)> = Vec::new();

        for projection in pending {
            let source_ready = projection.source_id.is_none()
                || self.sources.contains_key(&projection.source_id);
            if !source_ready {
                self.pending.push(projection);
                continue;
            }
            if !valid(&projection.data) {
                debug!(mid = %projection.data.mid, "Discarding parked projection, transceiver not renegotiated");
                continue;
            }
            self.projections.insert(projection.data.mid.clone(), projection.clone());
            match restored.iter_mut().find(|(source, _)| *source == projection.source_id) {
                Some((_, group)) => group.push(projection.data),
                None => restored.push((projection.source_id, vec![projection.data])),
            }
        }
        restored
    }

    pub(crate) fn clear(&mut self) {
        self.sources.clear();
        self.projections.clear();
        self.pending.clear();
        self.layers.clear();
        self.preferred_layer = None;
    }
}

impl ClientManager {
    /// Project tracks of a remote source onto local transceivers.
    ///
    /// `None` as the source asks the server for its automatic selection.
    /// Rejected unless subscribed, unless the named source is active, and
    /// unless every mid is a negotiated transceiver of the requested kind.
    pub fn project(&self, source_id: Option<&str>, projections: Vec<ProjectionData>) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Subscriber, "project") {
            return false;
        }
        if projections.is_empty() {
            warn!(client_id = %inner.id, "project requires at least one projection");
            return false;
        }

        let state = inner.state.read();
        if *state != SessionState::Subscribing {
            warn!(client_id = %inner.id, state = %*state, "project rejected, not subscribed");
            return false;
        }
        let epoch = inner.current_epoch();

        {
            let registry = inner.registry.read();
            let mut table = inner.projections.write();

            if source_id.is_some() && !table.is_source_active(source_id) {
                warn!(client_id = %inner.id, source_id = ?source_id, "project rejected, source is not active");
                return false;
            }
            if let Some(bad) = projections
                .iter()
                .find(|p| registry.transceiver_kind(&p.mid) != Some(p.media))
            {
                warn!(
                    client_id = %inner.id,
                    mid = %bad.mid,
                    media = %bad.media,
                    "project rejected, no matching transceiver"
                );
                return false;
            }

            table.insert(source_id.map(str::to_string), &projections);
        }
        drop(state);

        info!(client_id = %inner.id, source_id = ?source_id, count = projections.len(), "Projecting source");
        inner.send_projection(epoch, source_id.map(str::to_string), projections);
        true
    }

    /// Stop projecting onto the given mids. Mids without a projection are
    /// ignored.
    pub fn unproject(&self, mids: Vec<Mid>) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Subscriber, "unproject") {
            return false;
        }

        let state = inner.state.read();
        if *state != SessionState::Subscribing {
            warn!(client_id = %inner.id, state = %*state, "unproject rejected, not subscribed");
            return false;
        }
        let epoch = inner.current_epoch();
        let removed = inner.projections.write().remove(&mids);
        drop(state);

        debug!(client_id = %inner.id, requested = mids.len(), removed = removed.len(), "Unprojecting");
        if !mids.is_empty() {
            inner.send_command_reporting(epoch, SignalingCommand::Unproject { mids });
        }
        true
    }

    /// Pin the default projection to one layer, or `None` for automatic.
    ///
    /// Only the preference is recorded; the effect shows up in a later
    /// `on_layers` callback.
    pub fn select(&self, layer: Option<LayerData>) -> bool {
        let inner = &self.inner;
        if !inner.require_role(ClientRole::Subscriber, "select") {
            return false;
        }

        let state = inner.state.read();
        if *state != SessionState::Subscribing {
            warn!(client_id = %inner.id, state = %*state, "select rejected, not subscribed");
            return false;
        }
        let epoch = inner.current_epoch();
        inner.projections.write().set_preference(layer.clone());
        drop(state);

        debug!(client_id = %inner.id, layer = ?layer, "Selecting layer");
        inner.send_command_reporting(epoch, SignalingCommand::Select { layer });
        true
    }

    /// Projections currently committed
    pub fn projections(&self) -> Vec<Projection> {
        self.inner.projections.read().projections()
    }

    /// Sources announced active and not yet inactive
    pub fn active_sources(&self) -> Vec<SourceEntry> {
        self.inner.projections.read().sources()
    }

    /// Latest layer announcement for a mid
    pub fn layers(&self, mid: &Mid) -> Option<LayerSnapshot> {
        self.inner.projections.read().layers(mid)
    }

    /// Quality ladder offered by the latest layer announcement for a mid
    pub fn video_qualities(&self, mid: &Mid) -> Vec<VideoQuality> {
        match self.layers(mid) {
            Some(snapshot) => VideoQuality::ladder(&snapshot.active),
            None => vec![VideoQuality::Auto],
        }
    }

    /// Layer pinned through `select`, if any
    pub fn selected_layer(&self) -> Option<LayerData> {
        self.inner.projections.read().preference()
    }
}

impl ClientInner {
    /// Send a committed projection to the server, rolling it back on failure
    pub(crate) fn send_projection(self: &Arc<Self>, epoch: u64, source_id: Option<String>, data: Vec<ProjectionData>) {
        let inner = self.clone();
        self.spawn(async move {
            let command = SignalingCommand::Project { source_id: source_id.clone(), mappings: data.clone() };
            if let Err(e) = inner.transport.send_command(command).await {
                if !inner.is_current(epoch) {
                    return;
                }
                warn!(client_id = %inner.id, source_id = ?source_id, error = %e, "Projection rejected by server");
                inner.projections.write().rollback(&source_id, &data);
                inner.events.emit(ClientEvent::SignalingError { message: e.to_string() });
            }
        });
    }

    /// Re-issue parked projections whose sources are back
    pub(crate) fn restore_pending_projections(self: &Arc<Self>, epoch: u64) {
        let restorable = {
            let registry = self.registry.read();
            let mut table = self.projections.write();
            if table.pending_count() == 0 {
                return;
            }
            table.take_restorable(|data| registry.transceiver_kind(&data.mid) == Some(data.media))
        };

        for (source_id, data) in restorable {
            info!(client_id = %self.id, source_id = ?source_id, count = data.len(), "Restoring projection after reconnect");
            self.send_projection(epoch, source_id, data);
        }
    }
}
