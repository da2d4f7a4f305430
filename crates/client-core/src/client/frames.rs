//! Encoded-frame metadata side channel
//!
//! The transport calls into the pipeline for every encoded frame once a
//! session has been negotiated. On the publish path the registered
//! [`TransformableFrameHandler`] may append bytes that travel out-of-band with
//! the frame; on the subscribe path extracted bytes are queued to the listener
//! as `FrameMetadata` events. With the pipeline disabled, or with nobody to
//! hand the data to, both paths return immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::client::dispatch::EventSender;
use crate::events::ClientEvent;
use crate::track::{Mid, TrackKind};

/// Identifies the encoded frame being processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub kind: TrackKind,
    pub ssrc: u32,
    pub timestamp: u32,
    pub mid: Option<Mid>,
}

impl FrameInfo {
    pub fn new(kind: TrackKind, ssrc: u32, timestamp: u32) -> Self {
        Self { kind, ssrc, timestamp, mid: None }
    }

    pub fn with_mid(mut self, mid: impl Into<Mid>) -> Self {
        self.mid = Some(mid.into());
        self
    }
}

/// Publish-side hook, called after encoding and before packetization.
///
/// Runs synchronously on the transport's media thread; implementations should
/// only append to `metadata` and return.
pub trait TransformableFrameHandler: Send + Sync {
    fn on_transformable_frame(&self, frame: &FrameInfo, metadata: &mut Vec<u8>);
}

pub struct FrameMetadataPipeline {
    enabled: AtomicBool,
    handler: RwLock<Option<Arc<dyn TransformableFrameHandler>>>,
    events: EventSender,
}

impl FrameMetadataPipeline {
    pub(crate) fn new(events: EventSender, handler: Option<Arc<dyn TransformableFrameHandler>>) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            handler: RwLock::new(handler),
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Takes effect at the next frame the transport hands over
    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn set_handler(&self, handler: Option<Arc<dyn TransformableFrameHandler>>) {
        *self.handler.write() = handler;
    }

    /// Collect metadata to attach to an outgoing frame
    pub fn transform_outgoing(&self, frame: &FrameInfo) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        let handler = self.handler.read().clone()?;

        let mut metadata = Vec::new();
        handler.on_transformable_frame(frame, &mut metadata);
        if metadata.is_empty() {
            None
        } else {
            Some(Bytes::from(metadata))
        }
    }

    /// Surface metadata extracted from a received, not yet decoded frame
    pub fn deliver_incoming(&self, frame: FrameInfo, metadata: Bytes) {
        if !self.is_enabled() || metadata.is_empty() || !self.events.has_listener() {
            return;
        }
        self.events.emit(ClientEvent::FrameMetadata { frame, metadata });
    }
}

impl std::fmt::Debug for FrameMetadataPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameMetadataPipeline")
            .field("enabled", &self.is_enabled())
            .field("has_handler", &self.handler.read().is_some())
            .finish()
    }
}
