/// Why a connection ended without a terminal response from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No resource could be checked out; the bridge was never entered.
    AcquisitionFailed,
    /// The engine side of the bridge is gone.
    BridgeClosed,
    /// The per-connection deadline expired.
    TimedOut,
    /// The client went away before a response was written.
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BodyComplete,
    ResourceAcquired,
    EffectDispatched,
    Responded,
    Aborted(AbortReason),
}

/// Per-connection lifecycle.
///
/// `Accepted → BodyBuffered → ResourceAcquired → Dispatched(n) → Responded`,
/// with `Aborted` reachable from every non-terminal state. Terminal states
/// accept no further events, so each connection terminates exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    BodyBuffered,
    ResourceAcquired,
    Dispatched { round_trips: u32 },
    Responded,
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition: {event:?} in state {from:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: LifecycleEvent,
}

impl ConnectionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Responded | ConnectionState::Aborted(_))
    }

    pub fn advance(self, event: LifecycleEvent) -> Result<Self, InvalidTransition> {
        use ConnectionState as S;
        use LifecycleEvent as E;

        let next = match (self, event) {
            (S::Accepted, E::BodyComplete) => S::BodyBuffered,
            (S::BodyBuffered, E::ResourceAcquired) => S::ResourceAcquired,
            (S::ResourceAcquired, E::EffectDispatched) => S::Dispatched { round_trips: 1 },
            (S::Dispatched { round_trips }, E::EffectDispatched) => S::Dispatched {
                round_trips: round_trips.saturating_add(1),
            },
            (S::ResourceAcquired | S::Dispatched { .. }, E::Responded) => S::Responded,
            (state, E::Aborted(reason)) if !state.is_terminal() => S::Aborted(reason),
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
