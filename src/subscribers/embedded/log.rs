//! # LogWriter: event logger
//!
//! A subscriber that writes incoming [`Event`]s through `tracing`, under the
//! `payloadvisor::events` target.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  payloadvisor::events: starting sequence="TestGPIO" request=4
//! INFO  payloadvisor::events: completed sequence="TestGPIO" request=4 elapsed_ms=3
//! WARN  payloadvisor::events: timeout sequence="TestCANBus" request=9 timeout_ms=30000
//! ERROR payloadvisor::events: handler faulted sequence="UARTLoopback" request=5 info="index out of bounds"
//! INFO  payloadvisor::events: shutdown requested trigger="signal"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "payloadvisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let seq = e.sequence.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::AppStarted => {
                tracing::info!(target: TARGET, sequences = reason, "application started");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: TARGET, trigger = reason, "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: TARGET, "all executions stopped within grace");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(target: TARGET, "grace exceeded");
            }
            EventKind::SequenceStarting => {
                tracing::info!(target: TARGET, sequence = seq, request = e.request_id, "starting");
            }
            EventKind::SequenceCompleted => {
                tracing::info!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    elapsed_ms = e.elapsed_ms,
                    "completed"
                );
            }
            EventKind::SequenceFailed => {
                tracing::warn!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    err = reason,
                    "failed"
                );
            }
            EventKind::TimeoutHit => {
                tracing::warn!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    timeout_ms = e.timeout_ms,
                    "timeout"
                );
            }
            EventKind::SequenceCancelled => {
                tracing::info!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    stage = reason,
                    "cancelled"
                );
            }
            EventKind::HandlerFaulted => {
                tracing::error!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    info = reason,
                    "handler faulted"
                );
            }
            EventKind::SequenceNotFound => {
                tracing::warn!(target: TARGET, sequence = seq, request = e.request_id, "unknown sequence");
            }
            EventKind::SlotReleased => {
                tracing::debug!(
                    target: TARGET,
                    sequence = seq,
                    request = e.request_id,
                    elapsed_ms = e.elapsed_ms,
                    "slot released"
                );
            }
            EventKind::HealthChecked => {
                tracing::debug!(target: TARGET, status = reason, elapsed_ms = e.elapsed_ms, "health checked");
            }
            EventKind::HealthCheckFaulted => {
                tracing::error!(target: TARGET, info = reason, "health check faulted");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: TARGET, subscriber = seq, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: TARGET, subscriber = seq, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
