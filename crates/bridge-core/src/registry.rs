use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bridge_pool::Lease;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::effect::RespondToClient;
use crate::id::ConnectionId;
use crate::session::{AbortReason, ConnectionState, LifecycleEvent};

/// Outcome of handing a terminal response to its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The connection was registered but its client had already gone.
    ClientGone,
    /// No such connection: already responded, aborted or never registered.
    UnknownConnection,
}

struct PendingConnection {
    responder: oneshot::Sender<RespondToClient>,
    lease: Option<Lease>,
    cancel: CancellationToken,
    state: ConnectionState,
    accepted_at: Instant,
}

/// Server-side state of every connection currently inside the bridge.
///
/// ## Ownership
/// An entry owns the connection's response sink and its [`Lease`]. Leaving
/// the table is the only way to end a connection, and whoever removes the
/// entry drops the lease, so each resource is released exactly once.
/// Leases are always dropped after the table lock is released.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionId, PendingConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, PendingConnection>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a connection. Returns the receiver on which its terminal
    /// response arrives and its cancellation token.
    pub fn register(
        &self,
        id: ConnectionId,
        lease: Option<Lease>,
        accepted_at: Instant,
    ) -> (oneshot::Receiver<RespondToClient>, CancellationToken) {
        let (responder, response_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let entry = PendingConnection {
            responder,
            lease,
            cancel: cancel.clone(),
            state: ConnectionState::ResourceAcquired,
            accepted_at,
        };

        let displaced = self.lock().insert(id, entry);
        if let Some(old) = displaced {
            tracing::error!(connection_id = %id, "ConnectionRegistry: duplicate connection id");
            old.cancel.cancel();
        }
        (response_rx, cancel)
    }

    /// Terminal path: hands `response` to the connection and releases its
    /// resource whether or not the client is still there.
    pub fn respond(&self, id: ConnectionId, response: RespondToClient) -> Delivery {
        let Some(entry) = self.lock().remove(&id) else {
            return Delivery::UnknownConnection;
        };

        let PendingConnection {
            responder,
            lease,
            cancel,
            state,
            accepted_at,
        } = entry;
        cancel.cancel();
        drop(lease);
        let delivered = responder.send(response).is_ok();

        log_terminal(id, state, LifecycleEvent::Responded, accepted_at);
        if delivered {
            Delivery::Delivered
        } else {
            Delivery::ClientGone
        }
    }

    /// Ends a connection without a response from the engine. Returns `false`
    /// if it had already ended.
    pub fn abort(&self, id: ConnectionId, reason: AbortReason) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };

        entry.cancel.cancel();
        log_terminal(id, entry.state, LifecycleEvent::Aborted(reason), entry.accepted_at);
        // Dropping the entry drops the responder and releases the lease.
        drop(entry);
        true
    }

    /// Borrows the connection's lease for the duration of an effect.
    pub fn take_resource(&self, id: ConnectionId) -> Option<Lease> {
        self.lock().get_mut(&id).and_then(|entry| entry.lease.take())
    }

    /// Gives a borrowed lease back. If the connection ended meanwhile the
    /// lease is released here instead.
    pub fn restore_resource(&self, id: ConnectionId, lease: Lease) {
        let orphan = {
            let mut entries = self.lock();
            match entries.get_mut(&id) {
                Some(entry) if entry.lease.is_none() => {
                    entry.lease = Some(lease);
                    None
                }
                _ => Some(lease),
            }
        };
        if let Some(lease) = orphan {
            tracing::debug!(connection_id = %id, "ConnectionRegistry: releasing lease of ended connection");
            drop(lease);
        }
    }

    pub fn cancellation(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.lock().get(&id).map(|entry| entry.cancel.clone())
    }

    /// Records one engine round trip for the connection.
    pub fn note_dispatch(&self, id: ConnectionId) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return;
        };
        match entry.state.advance(LifecycleEvent::EffectDispatched) {
            Ok(next) => entry.state = next,
            Err(e) => tracing::warn!(connection_id = %id, "ConnectionRegistry: {e}"),
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.lock().get(&id).map(|entry| entry.state)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn log_terminal(id: ConnectionId, state: ConnectionState, event: LifecycleEvent, accepted_at: Instant) {
    match state.advance(event) {
        Ok(terminal) => tracing::debug!(
            connection_id = %id,
            state = ?terminal,
            elapsed_ms = accepted_at.elapsed().as_millis() as u64,
            "ConnectionRegistry: connection ended"
        ),
        Err(e) => tracing::warn!(connection_id = %id, "ConnectionRegistry: {e}"),
    }
}
