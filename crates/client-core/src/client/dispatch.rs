//! Ordered listener delivery
//!
//! Every client owns one dispatcher task. Events are queued on an unbounded
//! channel and handed to the listener one at a time, so callbacks for a client
//! never overlap; they are mirrored to broadcast subscribers in the same order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::events::{ClientEvent, ClientEventHandler};
use crate::stats::StatsGate;

const BROADCAST_CAPACITY: usize = 256;

/// Condition an event must still meet when it reaches the front of the queue
#[derive(Debug, Clone, Copy)]
pub(crate) enum DeliveryGate {
    Always,
    /// Dropped once the connection epoch has moved on
    Connection(u64),
    /// Dropped once the stats gate has been invalidated
    Stats(u64),
}

struct Envelope {
    event: ClientEvent,
    gate: DeliveryGate,
}

pub(crate) struct Listeners {
    handler: RwLock<Option<Arc<dyn ClientEventHandler>>>,
    broadcast: broadcast::Sender<ClientEvent>,
}

impl Listeners {
    fn has_listener(&self) -> bool {
        self.handler.read().is_some() || self.broadcast.receiver_count() > 0
    }
}

/// Cheap handle for queueing events
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<Envelope>,
    listeners: Arc<Listeners>,
}

impl EventSender {
    pub(crate) fn emit(&self, event: ClientEvent) {
        self.emit_gated(event, DeliveryGate::Always);
    }

    pub(crate) fn emit_gated(&self, event: ClientEvent, gate: DeliveryGate) {
        if self.tx.send(Envelope { event, gate }).is_err() {
            trace!("Event dispatcher stopped, dropping event");
        }
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.listeners.has_listener()
    }
}

pub(crate) struct EventDispatcher {
    sender: EventSender,
    listeners: Arc<Listeners>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub(crate) fn start(
        runtime: &Handle,
        client_id: String,
        handler: Option<Arc<dyn ClientEventHandler>>,
        connection_epoch: Arc<AtomicU64>,
        stats: Arc<StatsGate>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let listeners = Arc::new(Listeners {
            handler: RwLock::new(handler),
            broadcast,
        });

        let task = runtime.spawn(run_dispatcher(
            rx,
            listeners.clone(),
            connection_epoch,
            stats,
            client_id,
        ));

        Self {
            sender: EventSender { tx, listeners: listeners.clone() },
            listeners,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        self.sender.emit(event);
    }

    pub(crate) fn emit_gated(&self, event: ClientEvent, gate: DeliveryGate) {
        self.sender.emit_gated(event, gate);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.listeners.broadcast.subscribe()
    }

    pub(crate) fn set_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        *self.listeners.handler.write() = Some(handler);
    }

    pub(crate) fn clear_handler(&self) {
        *self.listeners.handler.write() = None;
    }

    pub(crate) fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    listeners: Arc<Listeners>,
    connection_epoch: Arc<AtomicU64>,
    stats: Arc<StatsGate>,
    client_id: String,
) {
    while let Some(Envelope { event, gate }) = rx.recv().await {
        let open = match gate {
            DeliveryGate::Always => true,
            DeliveryGate::Connection(epoch) => connection_epoch.load(Ordering::SeqCst) == epoch,
            DeliveryGate::Stats(ticket) => stats.is_current(ticket),
        };
        if !open {
            trace!(client_id = %client_id, event = event.name(), "Dropping stale event");
            continue;
        }

        // No receivers is not an error
        let _ = listeners.broadcast.send(event.clone());

        let handler = listeners.handler.read().clone();
        if let Some(handler) = handler {
            handler.on_client_event(event).await;
        }
    }
    debug!(client_id = %client_id, "Event dispatcher finished");
}
