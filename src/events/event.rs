//! # Runtime events emitted by the application, engine and health monitor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Execution events**: dispatch lifecycle (starting, completed, failed, timeout, ...)
//! - **Health events**: predicate evaluations and faults
//! - **Application events**: start, shutdown, grace outcome
//! - **Subscriber events**: overflow and panics of event subscribers
//!
//! The [`Event`] struct carries metadata such as timestamps, sequence name,
//! request id, reasons and durations.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use payloadvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::SequenceFailed)
//!     .with_sequence("TestGPIO")
//!     .with_request(7)
//!     .with_reason("gpio read failed")
//!     .with_elapsed(Duration::from_millis(12));
//!
//! assert_eq!(ev.kind, EventKind::SequenceFailed);
//! assert_eq!(ev.sequence.as_deref(), Some("TestGPIO"));
//! assert_eq!(ev.request_id, Some(7));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `sequence` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `sequence` (subscriber name), `reason` ("full"/"closed").
    SubscriberOverflow,

    // === Application events ===
    /// Application entered the running state.
    ///
    /// Sets: `reason` (number of mounted sequences).
    AppStarted,

    /// Shutdown requested (OS signal, explicit shutdown, or transport exit).
    ///
    /// Sets: `reason` (trigger).
    ShutdownRequested,

    /// All in-flight executions finished within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some executions did not finish in time.
    GraceExceeded,

    // === Execution events ===
    /// Handler invocation is about to start (slot acquired).
    ///
    /// Sets: `sequence`, `request_id`.
    SequenceStarting,

    /// Handler returned successfully.
    ///
    /// Sets: `sequence`, `request_id`, `elapsed_ms`.
    SequenceCompleted,

    /// Handler returned an error.
    ///
    /// Sets: `sequence`, `request_id`, `elapsed_ms`, `reason`.
    SequenceFailed,

    /// Execution exceeded its timeout; cancellation was signalled.
    ///
    /// Sets: `sequence`, `request_id`, `timeout_ms`.
    TimeoutHit,

    /// Request cancelled before start or stopped cooperatively.
    ///
    /// Sets: `sequence`, `request_id`, `reason` ("before_start"/"while_running").
    SequenceCancelled,

    /// Handler panicked; the fault was isolated.
    ///
    /// Sets: `sequence`, `request_id`, `reason` (panic message).
    HandlerFaulted,

    /// Dispatch targeted an unknown sequence name.
    ///
    /// Sets: `sequence` (requested name), `request_id`.
    SequenceNotFound,

    /// Handler task actually returned and its slot was released.
    ///
    /// Emitted for every started execution, including ones the caller
    /// stopped waiting for after a timeout.
    ///
    /// Sets: `sequence`, `request_id`, `elapsed_ms`.
    SlotReleased,

    // === Health events ===
    /// Health predicate evaluated.
    ///
    /// Sets: `reason` ("healthy"/"unhealthy"), `elapsed_ms`.
    HealthChecked,

    /// Health predicate panicked or timed out; reported as unhealthy.
    ///
    /// Sets: `reason`.
    HealthCheckFaulted,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Sequence (or subscriber) name, if applicable.
    pub sequence: Option<Arc<str>>,
    /// Invocation request id, if applicable.
    pub request_id: Option<u64>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Configured timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Elapsed execution time in milliseconds (compact).
    pub elapsed_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            sequence: None,
            request_id: None,
            reason: None,
            timeout_ms: None,
            elapsed_ms: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a sequence name.
    #[inline]
    pub fn with_sequence(mut self, name: impl Into<Arc<str>>) -> Self {
        self.sequence = Some(name.into());
        self
    }

    /// Attaches a request id.
    #[inline]
    pub fn with_request(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(compact_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_sequence(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_sequence(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    /// True for events that end an execution from the caller's point of view.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SequenceCompleted
                | EventKind::SequenceFailed
                | EventKind::TimeoutHit
                | EventKind::SequenceCancelled
                | EventKind::HandlerFaulted
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
