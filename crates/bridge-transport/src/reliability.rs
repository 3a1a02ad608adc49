//! # bridge-transport: Reliability Logic
//!
//! Deadline and disconnect handling for connections waiting on the engine.
//! A connection leaves the registry exactly once: by a response, by its
//! deadline, or because the client went away.

use std::sync::Arc;
use std::time::Duration;

use bridge_core::{AbortReason, ConnectionId, ConnectionRegistry, RespondToClient};
use tokio::sync::oneshot;

/// How a waiting connection came to an end.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    Responded(RespondToClient),
    /// The deadline expired first; the connection was aborted.
    TimedOut,
    /// The connection was ended elsewhere without a response.
    Aborted,
}

/// Aborts its connection when dropped while still armed.
///
/// hyper drops the service future when the client disconnects, which drops
/// this guard and releases the connection's resource without waiting for
/// the deadline.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    armed: bool,
}

impl ConnectionGuard {
    pub fn new(registry: Arc<ConnectionRegistry>, id: ConnectionId) -> Self {
        Self {
            registry,
            id,
            armed: true,
        }
    }

    /// Ends the connection now. Returns `false` if it had already ended.
    pub fn abort(mut self, reason: AbortReason) -> bool {
        self.armed = false;
        self.registry.abort(self.id, reason)
    }

    /// Waits for the terminal response, at most `deadline`.
    pub async fn await_response(
        mut self,
        mut response_rx: oneshot::Receiver<RespondToClient>,
        deadline: Duration,
    ) -> ResponseOutcome {
        let outcome = match tokio::time::timeout(deadline, &mut response_rx).await {
            Ok(Ok(response)) => ResponseOutcome::Responded(response),
            Ok(Err(_)) => ResponseOutcome::Aborted,
            Err(_) => {
                if self.registry.abort(self.id, AbortReason::TimedOut) {
                    tracing::warn!(connection_id = %self.id, ?deadline, "ConnectionGuard: deadline expired");
                    ResponseOutcome::TimedOut
                } else {
                    // Lost the race against a response landing at the deadline.
                    match response_rx.try_recv() {
                        Ok(response) => ResponseOutcome::Responded(response),
                        Err(_) => ResponseOutcome::Aborted,
                    }
                }
            }
        };
        self.armed = false;
        outcome
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.armed && self.registry.abort(self.id, AbortReason::TransportClosed) {
            tracing::debug!(connection_id = %self.id, "ConnectionGuard: client disconnected");
        }
    }
}
