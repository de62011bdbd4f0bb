//! # PayloadApplication: owns the runtime and drives its lifecycle.
//!
//! The application bundles configuration, sequence registry, execution engine,
//! metrics, health monitor and the event bus. Setup happens before [`run`];
//! `run` serves the transport until a shutdown trigger and then drains in-flight
//! executions within the grace period.
//!
//! ## Lifecycle
//! ```text
//! Setup ──run()──► Running ──trigger──► Stopped
//!   │                 │                    │
//!   │ mount_sequence  │ AppStarted         │ mount_sequence / set_health_check / run
//!   │ set_health_check│ serve transport    │   └─► Err(AlreadyRunning)
//!   │                 │ OS signal / shutdown() / transport returns / transport fails
//!   │                 └─► ShutdownRequested
//!   │                     engine.shutdown(grace) ──► AllStoppedWithin | GraceExceeded
//! ```
//!
//! ## Event delivery
//! ```text
//! engine / health ── publish ──► Bus ──► subscriber_listener ──► SubscriberSet::emit
//!                                                                 ├─► LogWriter
//!                                                                 └─► user subscribers
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use payloadvisor::{
//!     AppConfig, ExecutionContext, HandlerFn, LogWriter, PayloadApplication, SequenceError,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = PayloadApplication::builder(AppConfig::from_env())
//!         .with_subscriber(Arc::new(LogWriter::new()))
//!         .build();
//!
//!     app.mount_sequence(
//!         "HelloWorld",
//!         HandlerFn::arc(|_ctx: ExecutionContext| async { Ok::<_, SequenceError>(()) }),
//!     )?;
//!
//!     app.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! [`run`]: PayloadApplication::run

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, SequenceOptions};
use crate::engine::{ExecutionEngine, StatsSnapshot};
use crate::error::{DispatchError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::health::{HealthCheck, HealthMonitor, HealthReport};
use crate::metrics::MetricsRegistry;
use crate::peripherals::Hardware;
use crate::sequences::{HandlerRef, InvocationRequest, RequestId, SequenceOutput, SequenceRegistry};
use crate::shutdown;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::transport::{Gateway, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Setup,
    Running,
    Stopped,
}

/// Builder for [`PayloadApplication`].
pub struct AppBuilder {
    cfg: AppConfig,
    hardware: Hardware,
    subscribers: Vec<Arc<dyn Subscribe>>,
    transport: Option<Box<dyn Transport>>,
}

impl AppBuilder {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            cfg,
            hardware: Hardware::new(),
            subscribers: Vec::new(),
            transport: None,
        }
    }

    /// Installs the peripheral drivers and payload client.
    pub fn with_hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = hardware;
        self
    }

    /// Replaces the event subscribers.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one event subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Sets the request transport. Without one, `run` waits for a signal or `shutdown()`.
    pub fn with_transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn build(self) -> PayloadApplication {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let metrics = Arc::new(MetricsRegistry::new(cfg.metrics_capacity));
        let health = Arc::new(HealthMonitor::new(
            cfg.health_freshness,
            cfg.health_timeout(),
            bus.clone(),
        ));
        let registry = Arc::new(SequenceRegistry::new());

        let mut hardware = self.hardware;
        hardware.configure(&cfg);

        let engine = Arc::new(ExecutionEngine::new(
            cfg.clone(),
            Arc::clone(&registry),
            hardware,
            Arc::clone(&metrics),
            bus.clone(),
        ));

        PayloadApplication {
            cfg,
            bus,
            registry,
            engine,
            metrics,
            health,
            subscribers: Mutex::new(self.subscribers),
            transport: Mutex::new(self.transport),
            phase: Mutex::new(Phase::Setup),
            shutdown: CancellationToken::new(),
        }
    }
}

/// The payload application runtime.
pub struct PayloadApplication {
    cfg: AppConfig,
    bus: Bus,
    registry: Arc<SequenceRegistry>,
    engine: Arc<ExecutionEngine>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthMonitor>,
    subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    phase: Mutex<Phase>,
    shutdown: CancellationToken,
}

/// Cloneable trigger for [`PayloadApplication::shutdown`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl PayloadApplication {
    pub fn builder(cfg: AppConfig) -> AppBuilder {
        AppBuilder::new(cfg)
    }

    /// Application with `cfg`, no hardware, subscribers or transport.
    pub fn new(cfg: AppConfig) -> Self {
        AppBuilder::new(cfg).build()
    }

    /// Runs `f` while the application is still in setup.
    fn in_setup<T>(&self, f: impl FnOnce() -> Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        let phase = lock(&self.phase);
        if *phase != Phase::Setup {
            return Err(RuntimeError::AlreadyRunning);
        }
        f()
    }

    /// Registers a sequence with default options.
    pub fn mount_sequence(&self, name: &str, handler: HandlerRef) -> Result<(), RuntimeError> {
        self.mount_sequence_with(name, handler, SequenceOptions::default())
    }

    /// Registers a sequence with per-sequence concurrency/timeout overrides.
    pub fn mount_sequence_with(
        &self,
        name: &str,
        handler: HandlerRef,
        options: SequenceOptions,
    ) -> Result<(), RuntimeError> {
        self.in_setup(|| {
            self.registry.register_with(name, handler, options)?;
            tracing::debug!(sequence = name, ?options, "sequence mounted");
            Ok(())
        })
    }

    /// Installs the health predicate.
    pub fn set_health_check(&self, predicate: Arc<dyn HealthCheck>) -> Result<(), RuntimeError> {
        self.in_setup(|| {
            self.health.set_predicate(predicate);
            Ok(())
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    /// Event bus (subscribe for raw events).
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Handle for transports and embedders.
    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.health),
            Arc::clone(&self.metrics),
        )
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

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Requests a graceful shutdown of a running (or about to run) application.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Serves until a shutdown trigger, then drains executions within the grace period.
    ///
    /// Returns `Err` on transport failure, signal setup failure or grace overrun.
    /// A second call fails with [`RuntimeError::AlreadyRunning`].
    pub async fn run(&self) -> Result<(), RuntimeError> {
        {
            let mut phase = lock(&self.phase);
            if *phase != Phase::Setup {
                return Err(RuntimeError::AlreadyRunning);
            }
            *phase = Phase::Running;
        }

        let listener_stop = CancellationToken::new();
        let subscribers = std::mem::take(&mut *lock(&self.subscribers));
        let listener = self.subscriber_listener(
            SubscriberSet::new(subscribers, self.bus.clone()),
            listener_stop.clone(),
        );

        let mounted = self.registry.len();
        tracing::info!(sequences = mounted, "payload application started");
        self.bus
            .publish(Event::new(EventKind::AppStarted).with_reason(mounted.to_string()));

        let transport = lock(&self.transport).take();
        let served = self.serve_until_shutdown(transport).await;
        self.shutdown.cancel();

        let drained = self.engine.shutdown(self.cfg.grace).await;
        if let Err(e) = &drained {
            tracing::error!(error = %e, "shutdown grace exceeded");
        }
        *lock(&self.phase) = Phase::Stopped;

        listener_stop.cancel();
        let _ = listener.await;

        served.and(drained)
    }

    async fn serve_until_shutdown(
        &self,
        transport: Option<Box<dyn Transport>>,
    ) -> Result<(), RuntimeError> {
        let gateway = self.gateway();
        let token = self.shutdown.child_token();
        let serve = async {
            match &transport {
                Some(t) => {
                    tracing::debug!(transport = t.name(), "transport serving");
                    t.serve(gateway, token).await
                }
                None => std::future::pending().await,
            }
        };
        let signals = async {
            if self.cfg.handle_os_signals {
                shutdown::wait_for_shutdown_signal().await
            } else {
                std::future::pending().await
            }
        };

        let (trigger, result) = tokio::select! {
            res = signals => match res {
                Ok(signal) => (signal.to_string(), Ok(())),
                Err(e) => ("signal setup failed".to_string(), Err(RuntimeError::Signal(e))),
            },
            _ = self.shutdown.cancelled() => ("shutdown requested".to_string(), Ok(())),
            res = serve => match res {
                Ok(()) => ("transport finished".to_string(), Ok(())),
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "transport failed");
                    (
                        "transport failed".to_string(),
                        Err(RuntimeError::Transport { error: format!("{e:#}") }),
                    )
                }
            },
        };

        tracing::info!(%trigger, "shutdown requested");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(trigger));
        result
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains and closes it.
    fn subscriber_listener(&self, set: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscriber listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        })
    }
}

impl std::fmt::Debug for PayloadApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadApplication")
            .field("phase", &*lock(&self.phase))
            .field("sequences", &self.registry.names())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
