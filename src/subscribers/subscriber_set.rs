//! # Per-subscriber delivery of sequence events.
//!
//! [`SubscriberSet`] takes each event off the bus listener and copies it into
//! one bounded queue per subscriber. A worker per queue calls
//! [`Subscribe::on_event`], so a log writer flushing to a slow disk never holds
//! back dispatch or another subscriber.
//!
//! ```text
//! listener ──► emit(SequenceStarting #41) ──► [LogWriter queue] ──► worker ──► on_event
//!                                        └──► [telemetry queue] ──► worker ──► on_event
//!                                                                     └─ panic ──► SubscriberPanicked
//! ```
//!
//! A single request produces three or more events, so a burst of N uplink
//! requests puts at least 3N events in each queue. When a queue is full the
//! event is dropped for that subscriber only and `SubscriberOverflow` goes back
//! on the bus. Overflow notices are never re-queued on overflow, so a wedged
//! subscriber cannot loop. Within one subscriber, events of a request arrive in
//! publish order (`SequenceStarting` before its terminal kind before
//! `SlotReleased`). Across subscribers there is no ordering: one may still be
//! logging request #41 while another handles #46.
//!
//! A panicking `on_event` is caught, reported as `SubscriberPanicked`, and the
//! worker moves on to the next event. The catch uses `AssertUnwindSafe`, so a
//! subscriber that panics while holding a lock may leave its own state poisoned.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};
use crate::panic_message;
use crate::subscribers::Subscribe;

/// Per-subscriber channel metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for multiple event subscribers.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await
                    {
                        let info = panic_message(&*panic_err);
                        tracing::error!(subscriber = sub.name(), %info, "subscriber panicked");
                        bus_for_worker.publish(Event::subscriber_panicked(sub.name(), info));
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Returns the number of subscribers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` if the set has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Queues `event` for every subscriber without waiting.
    ///
    /// A full or closed queue drops the event for that subscriber and publishes
    /// `SubscriberOverflow`, unless the event is itself an overflow notice.
    pub fn emit(&self, event: &Event) {
        if self.channels.is_empty() {
            return;
        }
        let event = Arc::new(event.clone());
        let is_overflow_evt = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if !is_overflow_evt {
                        self.bus
                            .publish(Event::subscriber_overflow(channel.name, "full"));
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    if !is_overflow_evt {
                        self.bus
                            .publish(Event::subscriber_overflow(channel.name, "closed"));
                    }
                }
            }
        }
    }

    /// Gracefully shuts down all subscriber workers.
    ///
    /// Drops the senders, then waits for every worker to drain its queue.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscribe for Counting {
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct Panicking;

    #[async_trait]
    impl Subscribe for Panicking {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber boom");
        }
        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct Stalled(CancellationToken);

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _event: &Event) {
            self.0.cancelled().await;
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn burst_overflows_only_the_stalled_subscriber() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let seen = Arc::new(AtomicUsize::new(0));
        let stalled = Arc::new(Stalled(CancellationToken::new()));
        let set = SubscriberSet::new(
            vec![stalled.clone() as Arc<dyn Subscribe>, Arc::new(Counting(seen.clone()))],
            bus.clone(),
        );

        for id in 1..=4u64 {
            for kind in [
                EventKind::SequenceStarting,
                EventKind::SequenceCompleted,
                EventKind::SlotReleased,
            ] {
                set.emit(&Event::new(kind).with_sequence("HelloWorld").with_request(id));
            }
        }

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.sequence.as_deref(), Some("stalled"));

        stalled.0.cancel();
        set.shutdown().await;
        assert_eq!(seen.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn panicking_subscriber_is_isolated() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let seen = Arc::new(AtomicUsize::new(0));

        let set = SubscriberSet::new(
            vec![Arc::new(Panicking), Arc::new(Counting(seen.clone()))],
            bus.clone(),
        );
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::AppStarted));
        set.emit(&Event::new(EventKind::AppStarted));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.sequence.as_deref(), Some("panicking"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber boom"));

        set.shutdown().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
