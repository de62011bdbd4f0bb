//! # Lifecycle channel for sequence dispatch.
//!
//! Every dispatch leaves a trail on the [`Bus`]: `SequenceStarting`, one
//! terminal kind (`SequenceCompleted`, `SequenceFailed`, `TimeoutHit`,
//! `SequenceCancelled`, `HandlerFaulted`), then `SlotReleased` once the handler
//! task is gone. Unknown names produce a lone `SequenceNotFound`. Health polls
//! and app phase changes share the same channel.
//!
//! ```text
//! dispatch(req) ──► ExecutionEngine ── SequenceStarting ─┐
//! handler task  ── Completed / Failed / Faulted ─────────┤
//! timeout/cancel ── TimeoutHit / SequenceCancelled ──────┼──► Bus ──► listener ──► SubscriberSet
//! slot guard drop ── SlotReleased ───────────────────────┤   (broadcast, in PayloadApplication)
//! HealthMonitor ── HealthChecked / HealthCheckFaulted ───┤
//! PayloadApplication ── AppStarted / ShutdownRequested ──┘
//! ```
//!
//! Publishing never waits, so an engine under a burst of uplink requests is not
//! slowed by event consumers. The ring holds `AppConfig::bus_capacity` events
//! shared by all receivers. A receiver that falls behind a burst gets
//! `RecvError::Lagged(n)` and resumes at the oldest retained event; events sent
//! while nobody is subscribed are gone. Every event carries a global `seq`, so a
//! lagged reader can tell which part of a request trail it missed.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel shared by the engine, execution tasks, health monitor and app.
///
/// Clones share one sender.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
