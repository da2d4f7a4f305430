//! Process-wide teardown
//!
//! Every live client holds a lease. [`cleanup`] releases process-wide
//! resources once no lease is outstanding and refuses otherwise. After a
//! successful teardown no new client can be built, and clients that somehow
//! survive it refuse to connect or register tracks.

use parking_lot::{const_mutex, Mutex};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

struct Arena {
    live_clients: usize,
    torn_down: bool,
}

static ARENA: Mutex<Arena> = const_mutex(Arena { live_clients: 0, torn_down: false });

/// Held by each client for as long as it exists
#[derive(Debug)]
pub(crate) struct ClientLease(());

impl ClientLease {
    pub(crate) fn acquire() -> ClientResult<Self> {
        let mut arena = ARENA.lock();
        if arena.torn_down {
            return Err(ClientError::ProcessTornDown);
        }
        arena.live_clients += 1;
        debug!(live_clients = arena.live_clients, "Client lease acquired");
        Ok(ClientLease(()))
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        let mut arena = ARENA.lock();
        arena.live_clients = arena.live_clients.saturating_sub(1);
        debug!(live_clients = arena.live_clients, "Client lease released");
    }
}

/// Number of clients currently alive in this process
pub fn live_clients() -> usize {
    ARENA.lock().live_clients
}

pub fn is_torn_down() -> bool {
    ARENA.lock().torn_down
}

/// Release process-wide resources.
///
/// Fails with [`ClientError::ResourceBusy`] while any client is alive. Calling
/// it again after a successful teardown is a no-op.
pub fn cleanup() -> ClientResult<()> {
    let mut arena = ARENA.lock();
    if arena.live_clients > 0 {
        warn!(live_clients = arena.live_clients, "Refusing process cleanup while clients are alive");
        return Err(ClientError::ResourceBusy { live_clients: arena.live_clients });
    }
    if !arena.torn_down {
        arena.torn_down = true;
        info!("Process-wide client resources released");
    }
    Ok(())
}
