//! # Execution engine: runs invocation requests against registered sequences.
//!
//! Each dispatched request goes through admission, a bounded slot, an isolated
//! handler task and a timeout-guarded wait.
//!
//! ## Flow
//! ```text
//! dispatch(request)
//!   ├─► closed?                      ──► Err(Closed)
//!   ├─► registry.entry(name)         ──► unknown: publish SequenceNotFound, Err(SequenceNotFound)
//!   ├─► in_flight.admit(id, token)   ──► id in use: Err(DuplicateRequest)
//!   ├─► select! {
//!   │     token.cancelled()          ──► publish SequenceCancelled(before_start), Err(Cancelled)
//!   │     acquire(per-seq, global)   ──► Slot
//!   │   }
//!   ├─► publish SequenceStarting
//!   ├─► tracker.spawn {
//!   │     catch_unwind(handler.execute(ctx))
//!   │     scope.expire(); drop(slot); publish SlotReleased
//!   │     send result ──► oneshot
//!   │   }
//!   └─► timeout(limit, oneshot)
//!         ├─ Ok(Ok(_))               ──► publish SequenceCompleted
//!         ├─ Err(cancellation)       ──► publish SequenceCancelled(while_running)
//!         ├─ Err(e)                  ──► publish SequenceFailed, Err(Failed)
//!         ├─ panic                   ──► publish HandlerFaulted, Err(HandlerFault)
//!         └─ elapsed                 ──► token.cancel(), publish TimeoutHit, Err(Timeout)
//!                                        (slot stays held until the handler really returns)
//! ```
//!
//! ## Rules
//! - Exactly one terminal event per admitted request that the caller waits for.
//! - `SlotReleased` is published for every started handler, also after a timeout.
//! - Per-invocation tokens are children of the engine token; `shutdown` cancels them all.
//! - Same-sequence FIFO holds only for sequences registered with a concurrency limit of 1.

mod slots;
mod stats;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{oneshot, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use stats::{ExecutionStats, StatsSnapshot};

use crate::config::AppConfig;
use crate::error::{DispatchError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::MetricsRegistry;
use crate::panic_message;
use crate::peripherals::{Hardware, InvocationScope};
use crate::sequences::{
    ExecutionContext, InvocationRequest, RequestId, SequenceOutput, SequenceRegistry,
};
use slots::InFlight;

/// Dispatches invocation requests to sequence handlers.
pub struct ExecutionEngine {
    cfg: AppConfig,
    registry: Arc<SequenceRegistry>,
    hardware: Hardware,
    metrics: Arc<MetricsRegistry>,
    bus: Bus,
    global: Option<Arc<Semaphore>>,
    in_flight: InFlight,
    tracker: TaskTracker,
    token: CancellationToken,
    closed: AtomicBool,
    stats: Arc<ExecutionStats>,
}

impl ExecutionEngine {
    /// Creates an engine over `registry`.
    ///
    /// Global concurrency and the default timeout come from `cfg`.
    pub fn new(
        cfg: AppConfig,
        registry: Arc<SequenceRegistry>,
        hardware: Hardware,
        metrics: Arc<MetricsRegistry>,
        bus: Bus,
    ) -> Self {
        let global = cfg.concurrency_limit().map(|n| Arc::new(Semaphore::new(n)));
        Self {
            cfg,
            registry,
            hardware,
            metrics,
            bus,
            global,
            in_flight: InFlight::default(),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            stats: Arc::new(ExecutionStats::default()),
        }
    }

    /// Runs `request` and returns the handler outcome.
    ///
    /// The handler runs on its own task; dropping the returned future stops
    /// waiting but does not stop the handler.
    pub async fn dispatch(&self, request: InvocationRequest) -> Result<SequenceOutput, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        self.stats.record_dispatched();
        let id = request.request_id();

        let entry = match self.registry.entry(request.sequence_name()) {
            Ok(entry) => entry,
            Err(_) => {
                self.stats.record_not_found();
                self.bus.publish(
                    Event::new(EventKind::SequenceNotFound)
                        .with_sequence(request.sequence_name_arc())
                        .with_request(id.get()),
                );
                return Err(DispatchError::SequenceNotFound {
                    name: request.sequence_name().to_string(),
                });
            }
        };
        let name = Arc::clone(&entry.name);

        let token = self.token.child_token();
        let guard = self
            .in_flight
            .admit(id, Arc::clone(&name), token.clone())
            .ok_or(DispatchError::DuplicateRequest { request_id: id })?;

        let slot = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(self.cancelled(&name, id, "before_start")),
            res = slots::acquire(entry.limiter.clone(), self.global.clone()) => match res {
                Ok(slot) => slot,
                Err(_closed) => return Err(DispatchError::Closed),
            },
        };
        if token.is_cancelled() {
            return Err(self.cancelled(&name, id, "before_start"));
        }

        guard.mark_started();
        self.stats.slot_taken();
        self.bus.publish(
            Event::new(EventKind::SequenceStarting)
                .with_sequence(Arc::clone(&name))
                .with_request(id.get()),
        );

        let scope = InvocationScope::new(token.clone());
        let ctx = ExecutionContext::new(
            request,
            scope.clone(),
            self.hardware.clone(),
            Arc::clone(&self.metrics),
        );
        let (tx, rx) = oneshot::channel();
        let handler = Arc::clone(&entry.handler);
        let bus = self.bus.clone();
        let stats = Arc::clone(&self.stats);
        let task_name = Arc::clone(&name);
        let started = Instant::now();

        self.tracker.spawn(async move {
            let res = AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await;
            scope.expire();
            drop(slot);
            drop(guard);
            stats.slot_released();
            bus.publish(
                Event::new(EventKind::SlotReleased)
                    .with_sequence(Arc::clone(&task_name))
                    .with_request(id.get())
                    .with_elapsed(started.elapsed()),
            );
            if let Err(Err(panic)) = tx.send(res) {
                tracing::error!(
                    sequence = %task_name,
                    request = %id,
                    info = %panic_message(&*panic),
                    "handler panicked after its caller stopped waiting"
                );
            }
        });

        let received = match entry.options.effective_timeout(&self.cfg) {
            Some(limit) => match time::timeout(limit, rx).await {
                Ok(r) => r,
                Err(_elapsed) => {
                    token.cancel();
                    self.stats.record_timed_out();
                    self.bus.publish(
                        Event::new(EventKind::TimeoutHit)
                            .with_sequence(Arc::clone(&name))
                            .with_request(id.get())
                            .with_timeout(limit),
                    );
                    tracing::warn!(sequence = %name, request = %id, timeout = ?limit, "sequence timed out; cancellation signalled");
                    return Err(DispatchError::Timeout {
                        name: name.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        };

        let elapsed = started.elapsed();
        match received {
            Ok(Ok(Ok(output))) => {
                self.stats.record_completed();
                self.bus.publish(
                    Event::new(EventKind::SequenceCompleted)
                        .with_sequence(Arc::clone(&name))
                        .with_request(id.get())
                        .with_elapsed(elapsed),
                );
                Ok(output)
            }
            Ok(Ok(Err(e))) if e.is_cancellation() => Err(self.cancelled(&name, id, "while_running")),
            Ok(Ok(Err(e))) => {
                self.stats.record_failed();
                self.bus.publish(
                    Event::new(EventKind::SequenceFailed)
                        .with_sequence(Arc::clone(&name))
                        .with_request(id.get())
                        .with_elapsed(elapsed)
                        .with_reason(e.to_string()),
                );
                Err(DispatchError::Failed {
                    name: name.to_string(),
                    error: e,
                })
            }
            Ok(Err(panic)) => Err(self.faulted(&name, id, panic_message(&*panic))),
            Err(_dropped) => Err(self.faulted(&name, id, "handler task dropped before completion".into())),
        }
    }

    fn cancelled(&self, name: &Arc<str>, id: RequestId, phase: &'static str) -> DispatchError {
        self.stats.record_cancelled();
        self.bus.publish(
            Event::new(EventKind::SequenceCancelled)
                .with_sequence(Arc::clone(name))
                .with_request(id.get())
                .with_reason(phase),
        );
        DispatchError::Cancelled { request_id: id }
    }

    fn faulted(&self, name: &Arc<str>, id: RequestId, info: String) -> DispatchError {
        self.stats.record_faulted();
        tracing::error!(sequence = %name, request = %id, %info, "handler panicked; fault isolated");
        self.bus.publish(
            Event::new(EventKind::HandlerFaulted)
                .with_sequence(Arc::clone(name))
                .with_request(id.get())
                .with_reason(info.clone()),
        );
        DispatchError::HandlerFault {
            name: name.to_string(),
            error: info,
        }
    }

    /// Signals cancellation to request `id`.
    ///
    /// A request still waiting for a slot fails with `Cancelled`; a running handler
    /// observes the cancellation cooperatively. Returns `false` if `id` is not in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.in_flight.cancel(id)
    }

    /// Current execution statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Sorted names of sequences whose handler is currently running.
    pub fn running(&self) -> Vec<String> {
        self.in_flight.running_names()
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting requests, cancels every invocation and waits up to `grace`.
    ///
    /// Publishes `AllStoppedWithin` or `GraceExceeded`; the latter is returned as
    /// [`RuntimeError::GraceExceeded`] naming the sequences still running.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.closed.store(true, Ordering::Release);
        self.token.cancel();
        self.tracker.close();

        match time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck = self.in_flight.running_names();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("stats", &self.stats.snapshot())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
