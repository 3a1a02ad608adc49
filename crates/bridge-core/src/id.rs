use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Ids available per millisecond.
pub const SEQUENCE_SPACE: u64 = 4096;

/// 2038-01-19T03:14:07.999Z, the last millisecond ids must cover.
pub const MAX_SUPPORTED_TIMESTAMP_MS: u64 = 2_147_483_647_999;

/// Largest integer a double-precision consumer can represent exactly.
pub const EXACT_INTEGER_CEILING: u64 = 1 << 53;

static_assertions::const_assert!(
    MAX_SUPPORTED_TIMESTAMP_MS * SEQUENCE_SPACE + (SEQUENCE_SPACE - 1) < EXACT_INTEGER_CEILING
);

/// Process-unique connection identifier: `timestamp_ms * 4096 + sequence`.
///
/// Serialises as a bare integer so decision engines on a float-only number
/// model still read it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn from_parts(timestamp_ms: u64, sequence: u64) -> Self {
        Self(timestamp_ms * SEQUENCE_SPACE + sequence)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn timestamp_ms(self) -> u64 {
        self.0 / SEQUENCE_SPACE
    }

    pub const fn sequence(self) -> u64 {
        self.0 % SEQUENCE_SPACE
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond wall clock, injectable for tests.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now_ms)))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::Release);
    }

    pub fn advance(&self, by_ms: u64) {
        self.0.fetch_add(by_ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Hands out strictly increasing [`ConnectionId`]s.
///
/// ## Algorithm
/// Within one millisecond the sequence counts up from 0; a new millisecond
/// resets it. When a millisecond runs out of sequence space the generator
/// borrows the next millisecond, and a clock that steps backwards is read as
/// the last millisecond issued. Both keep ids unique and ordered.
///
/// `next_id` takes `&mut self`, so calls can never interleave.
#[derive(Debug)]
pub struct ConnectionIdGenerator<C: Clock = SystemClock> {
    clock: C,
    previous_timestamp: Option<u64>,
    sequence_no: u64,
}

impl ConnectionIdGenerator<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ConnectionIdGenerator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ConnectionIdGenerator<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            previous_timestamp: None,
            sequence_no: 0,
        }
    }

    pub fn next_id(&mut self) -> ConnectionId {
        self.next_stamped().0
    }

    /// Like [`next_id`](Self::next_id), also returning the clock reading the
    /// id was derived from.
    pub fn next_stamped(&mut self) -> (ConnectionId, u64) {
        let now = self.clock.now_ms();

        let timestamp = match self.previous_timestamp {
            Some(previous) if now <= previous => {
                self.sequence_no += 1;
                if self.sequence_no == SEQUENCE_SPACE {
                    tracing::debug!(
                        timestamp = previous,
                        "ConnectionIdGenerator: sequence exhausted, borrowing next millisecond"
                    );
                    self.sequence_no = 0;
                    previous + 1
                } else {
                    previous
                }
            }
            _ => {
                self.sequence_no = 0;
                now
            }
        };

        self.previous_timestamp = Some(timestamp);
        (ConnectionId::from_parts(timestamp, self.sequence_no), now)
    }
}
