//! # Transport boundary.
//!
//! A [`Transport`] delivers ground requests to the application: it receives a
//! [`Gateway`] and serves until it finishes on its own, fails, or its shutdown
//! token is cancelled.
//!
//! ```text
//! ground link ──► Transport::serve(gateway, shutdown)
//!                     ├─► gateway.dispatch(request)   ──► ExecutionEngine
//!                     ├─► gateway.cancel(id)
//!                     ├─► gateway.check()             ──► HealthMonitor
//!                     └─► gateway.snapshot()/stats()  ──► MetricsRegistry / ExecutionStats
//! ```
//!
//! `Ok(())` from `serve` ends the run gracefully; `Err` makes
//! [`PayloadApplication::run`](crate::PayloadApplication::run) fail with
//! [`RuntimeError::Transport`](crate::RuntimeError::Transport).
//!
//! [`ScriptedTransport`] replays a fixed list of [`Step`]s, which is what the
//! bench demo and the integration tests use in place of a radio link.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::{ExecutionEngine, StatsSnapshot};
use crate::error::DispatchError;
use crate::health::{HealthMonitor, HealthReport};
use crate::metrics::{CounterSample, MetricsRegistry};
use crate::sequences::{InvocationRequest, RequestId, SequenceOutput};

/// What a transport may do with the application.
#[derive(Clone)]
pub struct Gateway {
    engine: Arc<ExecutionEngine>,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsRegistry>,
}

impl Gateway {
    pub(crate) fn new(
        engine: Arc<ExecutionEngine>,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            engine,
            health,
            metrics,
        }
    }

    pub async fn dispatch(&self, request: InvocationRequest) -> Result<SequenceOutput, DispatchError> {
        self.engine.dispatch(request).await
    }

    pub fn cancel(&self, id: RequestId) -> bool {
        self.engine.cancel(id)
    }

    pub async fn check(&self) -> HealthReport {
        self.health.check().await
    }

    /// Telemetry export of the payload counters.
    pub fn snapshot(&self) -> Vec<CounterSample> {
        self.metrics.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Registered sequence names.
    pub fn sequences(&self) -> Vec<String> {
        self.engine.registry().names()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

/// # Source of invocation requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "transport"
    }

    /// Serves requests until done, failed, or `shutdown` is cancelled.
    async fn serve(&self, gateway: Gateway, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// One scripted transport action.
#[derive(Clone, Debug)]
pub enum Step {
    /// Dispatch and wait for the outcome.
    Invoke { sequence: String, params: Vec<u8> },
    /// Dispatch without waiting; outcomes are collected before the script ends.
    Spawn { sequence: String, params: Vec<u8> },
    /// Pause between steps.
    Pause(Duration),
    /// Poll the health monitor.
    CheckHealth,
    /// Export the counters.
    ExportMetrics,
}

impl Step {
    pub fn invoke(sequence: impl Into<String>, params: impl Into<Vec<u8>>) -> Self {
        Step::Invoke {
            sequence: sequence.into(),
            params: params.into(),
        }
    }

    pub fn spawn(sequence: impl Into<String>, params: impl Into<Vec<u8>>) -> Self {
        Step::Spawn {
            sequence: sequence.into(),
            params: params.into(),
        }
    }
}

/// Recorded outcome of a dispatched step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub sequence: String,
    pub result: Result<SequenceOutput, DispatchError>,
}

/// Replays a fixed script of requests, then finishes.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: Vec<Step>,
    outcomes: Arc<Mutex<Vec<StepOutcome>>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            outcomes: Arc::default(),
        }
    }

    /// Outcomes recorded so far, in completion order.
    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.outcomes.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Shared view of the outcomes, readable after the transport was handed over.
    pub fn outcome_log(&self) -> Arc<Mutex<Vec<StepOutcome>>> {
        Arc::clone(&self.outcomes)
    }

    fn record(log: &Mutex<Vec<StepOutcome>>, sequence: String, result: Result<SequenceOutput, DispatchError>) {
        match &result {
            Ok(out) => tracing::info!(%sequence, output = out.message().unwrap_or(""), "sequence succeeded"),
            Err(e) => tracing::warn!(%sequence, error = %e, label = e.as_label(), "sequence did not succeed"),
        }
        log.lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(StepOutcome { sequence, result });
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn serve(&self, gateway: Gateway, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut detached = JoinSet::new();

        for step in &self.steps {
            if shutdown.is_cancelled() {
                break;
            }
            match step {
                Step::Invoke { sequence, params } => {
                    let res = gateway
                        .dispatch(InvocationRequest::new(sequence.as_str(), params))
                        .await;
                    Self::record(&self.outcomes, sequence.clone(), res);
                }
                Step::Spawn { sequence, params } => {
                    let gw = gateway.clone();
                    let log = Arc::clone(&self.outcomes);
                    let req = InvocationRequest::new(sequence.as_str(), params);
                    let sequence = sequence.clone();
                    detached.spawn(async move {
                        let res = gw.dispatch(req).await;
                        Self::record(&log, sequence, res);
                    });
                }
                Step::Pause(d) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(*d) => {}
                    }
                }
                Step::CheckHealth => {
                    let report = gateway.check().await;
                    tracing::info!(status = report.status.as_label(), cached = report.cached, "health polled");
                }
                Step::ExportMetrics => {
                    for sample in gateway.snapshot() {
                        tracing::info!(index = sample.index, name = %sample.name, value = sample.value, "counter");
                    }
                }
            }
        }

        while detached.join_next().await.is_some() {}
        Ok(())
    }
}
