//! Execution statistics: lock-free counters updated by the engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of the execution engine.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    faulted: AtomicU64,
    not_found: AtomicU64,
    in_flight: AtomicU64,
}

/// Point-in-time copy of [`ExecutionStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted by `dispatch` (including unknown names).
    pub dispatched: u64,
    /// Handlers that returned `Ok`.
    pub completed: u64,
    /// Handlers that returned an error other than cancellation.
    pub failed: u64,
    /// Requests that hit their timeout.
    pub timed_out: u64,
    /// Requests cancelled before or during execution.
    pub cancelled: u64,
    /// Handlers that panicked.
    pub faulted: u64,
    /// Requests naming an unknown sequence.
    pub not_found: u64,
    /// Handlers currently holding an execution slot.
    pub in_flight: u64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ExecutionStats {
    bump! {
        record_dispatched => dispatched,
        record_completed => completed,
        record_failed => failed,
        record_timed_out => timed_out,
        record_cancelled => cancelled,
        record_faulted => faulted,
        record_not_found => not_found,
        slot_taken => in_flight,
    }

    #[inline]
    pub(crate) fn slot_released(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}
