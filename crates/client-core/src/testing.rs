//! Test doubles for the signaling transport and the listener
//!
//! [`MockTransport`] answers every request from a script and records what
//! the client asked for. [`RecordingHandler`] keeps every event it receives
//! and lets a test wait for a particular one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::client::types::{ClientRole, SessionState};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, ClientEventHandler};
use crate::signaling::{
    HandshakeFailure, HandshakeRequest, NegotiatedTransceiver, SessionAnswer, SessionOffer, SignalingCommand,
    SignalingSession, SignalingTransport, TransportEvent,
};

#[derive(Default)]
struct MockState {
    handshake_failures: VecDeque<HandshakeFailure>,
    handshake_delay: Option<Duration>,
    negotiate_failures: VecDeque<String>,
    negotiate_delays: VecDeque<Duration>,
    command_failures: VecDeque<String>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,

    handshakes: Vec<HandshakeRequest>,
    offers: Vec<SessionOffer>,
    commands: Vec<SignalingCommand>,
    closes: usize,
}

/// Scripted [`SignalingTransport`]
///
/// Requests succeed unless a failure was queued for them. Negotiations are
/// answered with one transceiver per offered track, or per requested inbound
/// kind, with mids `"0"`, `"1"`, ... in offer order. Inbound track ids are
/// `"{kind}{index}"`.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next handshake with `status`
    pub fn fail_next_handshake(&self, status: i32, reason: impl Into<String>) {
        self.fail_handshakes(1, status, reason);
    }

    pub fn fail_handshakes(&self, count: usize, status: i32, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.lock();
        for _ in 0..count {
            state.handshake_failures.push_back(HandshakeFailure::new(status, reason.clone()));
        }
    }

    /// Hold every handshake for `delay` before answering
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.state.lock().handshake_delay = Some(delay);
    }

    /// Hold the next negotiation for `delay` before answering. The offer is
    /// recorded when it arrives.
    pub fn delay_next_negotiation(&self, delay: Duration) {
        self.state.lock().negotiate_delays.push_back(delay);
    }

    pub fn fail_next_negotiation(&self, reason: impl Into<String>) {
        self.state.lock().negotiate_failures.push_back(reason.into());
    }

    pub fn fail_next_command(&self, reason: impl Into<String>) {
        self.state.lock().command_failures.push_back(reason.into());
    }

    /// Push an event on the open connection. Returns false if none is open.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match &self.state.lock().events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate a network drop on the open connection
    pub fn drop_connection(&self, reason: impl Into<String>) -> bool {
        let tx = self.state.lock().events.take();
        match tx {
            Some(tx) => tx.send(TransportEvent::TransportDropped { reason: reason.into() }).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().events.is_some()
    }

    pub fn handshake_count(&self) -> usize {
        self.state.lock().handshakes.len()
    }

    pub fn handshakes(&self) -> Vec<HandshakeRequest> {
        self.state.lock().handshakes.clone()
    }

    pub fn offers(&self) -> Vec<SessionOffer> {
        self.state.lock().offers.clone()
    }

    pub fn commands(&self) -> Vec<SignalingCommand> {
        self.state.lock().commands.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    fn answer(offer: &SessionOffer) -> SessionAnswer {
        let transceivers = match offer.role {
            ClientRole::Publisher => offer
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| NegotiatedTransceiver::new(i.to_string(), t.kind, t.track_id.clone()))
                .collect(),
            ClientRole::Subscriber => offer
                .receive
                .iter()
                .enumerate()
                .map(|(i, kind)| NegotiatedTransceiver::new(i.to_string(), *kind, format!("{}{}", kind, i)))
                .collect(),
        };
        SessionAnswer { transceivers }
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<SignalingSession, HandshakeFailure> {
        let delay = {
            let mut state = self.state.lock();
            state.handshakes.push(request.clone());
            state.handshake_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = state.handshake_failures.pop_front() {
            debug!(status = failure.status, "Mock handshake failing");
            return Err(failure);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.events = Some(tx);
        Ok(SignalingSession::new(rx))
    }

    async fn negotiate(&self, offer: SessionOffer) -> ClientResult<SessionAnswer> {
        let answer = Self::answer(&offer);
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.offers.push(offer);
            (state.negotiate_delays.pop_front(), state.negotiate_failures.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(reason) => Err(ClientError::negotiation_failed(reason)),
            None => Ok(answer),
        }
    }

    async fn send_command(&self, command: SignalingCommand) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.commands.push(command);
        match state.command_failures.pop_front() {
            Some(reason) => Err(ClientError::signaling_error(reason)),
            None => Ok(()),
        }
    }

    async fn close(&self) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.closes += 1;
        state.events = None;
        Ok(())
    }
}

/// Listener that keeps every event it is handed
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ClientEvent>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    /// Event names in delivery order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ClientEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// States entered, in order
    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged { info } => Some(info.current),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until an event matching `predicate` has been delivered
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Option<ClientEvent>
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.events.lock().iter().find(|e| predicate(*e)).cloned() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub async fn wait_for_name(&self, name: &str, timeout: Duration) -> Option<ClientEvent> {
        self.wait_for(timeout, |e| e.name() == name).await
    }

    /// Wait until the listener has been told about a move into `state`
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.wait_for(timeout, |e| matches!(e, ClientEvent::StateChanged { info } if info.current == state))
            .await
            .is_some()
    }
}

#[async_trait]
impl ClientEventHandler for RecordingHandler {
    async fn on_client_event(&self, event: ClientEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}
