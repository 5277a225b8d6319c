//! Mutation counter driving snapshot triggers.
//!
//! ```text
//! Accumulating ──(count ≥ N, no flight)──▶ SnapshotInFlight
//!      ▲                                         │
//!      └──── success: count -= observed ─────────┤
//!      └──── failure: count kept (≥ N) ──────────┘
//! ```
//!
//! Mutations landing during a flight are counted toward the next cycle. A
//! failed snapshot leaves the counter at or above the threshold, so the next
//! mutation triggers a new attempt.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Phase of the snapshot state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    Accumulating,
    SnapshotInFlight,
}

/// Flight id meaning "nothing in flight".
const IDLE: u64 = 0;

#[derive(Debug, Default)]
struct CounterState {
    count: AtomicU64,
    /// Id of the flight holding the counter, or [`IDLE`].
    flight: AtomicU64,
    last_flight: AtomicU64,
}

impl CounterState {
    /// Ends `flight` if it still owns the counter. A flight cleared by
    /// [`MutationCounter::reset`] must not end a newer one.
    fn release(&self, flight: u64) {
        let _ = self
            .flight
            .compare_exchange(flight, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Permission to run one snapshot.
///
/// Settle it with [`MutationCounter::complete`]. A ticket dropped without
/// being completed (for example when the snapshot future is cancelled) ends
/// the flight as a failure, so the count is kept and the next mutation
/// triggers a new attempt.
#[derive(Debug)]
#[must_use = "a ticket keeps the counter in flight until completed or dropped"]
pub struct SnapshotTicket {
    observed: u64,
    flight: u64,
    state: Arc<CounterState>,
}

impl SnapshotTicket {
    /// Mutations counted when the snapshot was triggered.
    pub fn observed(&self) -> u64 {
        self.observed
    }
}

impl Drop for SnapshotTicket {
    fn drop(&mut self) {
        self.state.release(self.flight);
    }
}

/// Process-wide count of successful mutations since the last snapshot.
#[derive(Debug)]
pub struct MutationCounter {
    threshold: u64,
    state: Arc<CounterState>,
}

impl MutationCounter {
    /// Creates a counter. A threshold of zero is treated as one.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Arc::new(CounterState::default()),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn count(&self) -> u64 {
        self.state.count.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SnapshotPhase {
        if self.state.flight.load(Ordering::Acquire) == IDLE {
            SnapshotPhase::Accumulating
        } else {
            SnapshotPhase::SnapshotInFlight
        }
    }

    /// Counts one successful mutation.
    ///
    /// Returns a ticket when this mutation brought the counter to the
    /// threshold (or it already was there after a failure) and no snapshot
    /// is in flight.
    pub fn record(&self) -> Option<SnapshotTicket> {
        let count = self.state.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.threshold {
            self.try_begin()
        } else {
            None
        }
    }

    /// Enters `SnapshotInFlight` regardless of the count. `None` if a snapshot
    /// is already in flight.
    pub fn try_begin(&self) -> Option<SnapshotTicket> {
        let flight = self.state.last_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.state
            .flight
            .compare_exchange(IDLE, flight, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(SnapshotTicket {
            observed: self.count(),
            flight,
            state: Arc::clone(&self.state),
        })
    }

    /// Leaves `SnapshotInFlight`. On success the mutations observed at trigger
    /// time are subtracted; on failure the count is kept.
    pub fn complete(&self, ticket: SnapshotTicket, committed: bool) {
        if committed {
            // Never underflows, even after a concurrent reset.
            let _ = self
                .state
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                    Some(count.saturating_sub(ticket.observed))
                });
        }
        drop(ticket);
    }

    /// Back to zero and `Accumulating`.
    pub fn reset(&self) {
        self.state.count.store(0, Ordering::Release);
        self.state.flight.store(IDLE, Ordering::Release);
    }
}
