//! Server-side recording of a published stream
//!
//! Recording is a substate of `Publishing`. The client never decides whether
//! a stream is recorded; it forwards the request and mirrors the server's
//! answer. A start request is sent even when the cached state already says
//! recording.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::manager::{ClientInner, ClientManager};
use crate::client::types::{ClientRole, SessionState};
use crate::events::ClientEvent;
use crate::signaling::SignalingCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    NotRecording,
    Recording,
}

impl Default for RecordingState {
    fn default() -> Self {
        RecordingState::NotRecording
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingControl {
    state: Mutex<RecordingState>,
}

impl RecordingControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> RecordingState {
        *self.state.lock()
    }

    pub(crate) fn set(&self, state: RecordingState) {
        *self.state.lock() = state;
    }

    pub(crate) fn reset(&self) {
        self.set(RecordingState::NotRecording);
    }
}

impl ClientManager {
    /// Ask the server to start recording the published stream
    pub fn record(&self) -> bool {
        self.recording_request(true)
    }

    /// Ask the server to stop recording the published stream
    pub fn unrecord(&self) -> bool {
        self.recording_request(false)
    }

    /// Recording state as last confirmed by the server
    pub fn recording_state(&self) -> RecordingState {
        self.inner.recording.state()
    }

    pub fn is_recording(&self) -> bool {
        self.recording_state() == RecordingState::Recording
    }

    fn recording_request(&self, start: bool) -> bool {
        let inner = &self.inner;
        let operation = if start { "record" } else { "unrecord" };
        if !inner.require_role(ClientRole::Publisher, operation) {
            return false;
        }

        let state = inner.state.read();
        if *state != SessionState::Publishing {
            warn!(client_id = %inner.id, state = %*state, "{} rejected, not publishing", operation);
            return false;
        }
        let epoch = inner.current_epoch();
        drop(state);

        inner.request_recording(epoch, start);
        true
    }
}

impl ClientInner {
    pub(crate) fn request_recording(self: &Arc<Self>, epoch: u64, start: bool) {
        let inner = self.clone();
        self.spawn(async move {
            let command = if start {
                SignalingCommand::StartRecording
            } else {
                SignalingCommand::StopRecording
            };
            debug!(client_id = %inner.id, command = command.name(), "Sending recording request");
            let result = inner.transport.send_command(command).await;

            // Hold the state lock so a concurrent disconnect cannot reset the
            // cache between the epoch check and the update
            let state = inner.state.read();
            if !inner.is_current(epoch) {
                debug!(client_id = %inner.id, "Dropping recording answer from a previous session");
                return;
            }

            match (start, result) {
                (true, Ok(())) => {
                    info!(client_id = %inner.id, "Recording started");
                    inner.recording.set(RecordingState::Recording);
                    inner.events.emit(ClientEvent::RecordingStarted);
                }
                (false, Ok(())) => {
                    info!(client_id = %inner.id, "Recording stopped");
                    inner.recording.set(RecordingState::NotRecording);
                    inner.events.emit(ClientEvent::RecordingStopped);
                }
                (true, Err(e)) => {
                    warn!(client_id = %inner.id, error = %e, "Failed to start recording");
                    inner.events.emit(ClientEvent::RecordingStartFailed { reason: e.to_string() });
                }
                (false, Err(e)) => {
                    warn!(client_id = %inner.id, error = %e, "Failed to stop recording");
                    inner.events.emit(ClientEvent::RecordingStopFailed { reason: e.to_string() });
                }
            }
            drop(state);
        });
    }
}
