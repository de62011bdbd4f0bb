//! # Health monitoring with a freshness cache.
//!
//! [`HealthMonitor`] wraps a user-supplied [`HealthCheck`] predicate. The transport's
//! health protocol may poll it frequently; results are cached for a freshness
//! window so the predicate is not hammered.
//!
//! ## Flow
//! ```text
//! check()
//!   ├─► lock cache (async mutex, held across evaluation)
//!   ├─► cached && age < freshness ──► return cached report
//!   └─► evaluate predicate
//!          ├─ true               ──► Healthy
//!          ├─ false              ──► Unhealthy
//!          ├─ panic              ──► Unhealthy + HealthCheckFaulted (logged)
//!          └─ exceeds timeout    ──► Unhealthy + HealthCheckFaulted (logged)
//! ```
//!
//! ## Rules
//! - Two `check()` calls within the window evaluate the predicate **at most once**,
//!   even when they race: the second waits on the cache lock and reads the fresh result.
//! - A predicate fault is never propagated to the poller.
//! - Without a configured predicate the application reports healthy.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::events::{Bus, Event, EventKind};
use crate::panic_message;

/// Liveness state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Result of a health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Liveness state.
    pub status: HealthStatus,
    /// Wall-clock time the predicate was evaluated.
    pub checked_at: SystemTime,
    /// `true` if served from cache.
    pub cached: bool,
}

/// User-supplied liveness predicate.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    /// Returns `true` if the payload is healthy.
    async fn is_healthy(&self) -> bool;
}

/// Function-backed health predicate.
///
/// ## Example
/// ```rust
/// use payloadvisor::HealthFn;
///
/// let check = HealthFn::arc(|| true);
/// ```
pub struct HealthFn<F> {
    f: Arc<F>,
}

impl<F> HealthFn<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    /// Wraps a synchronous predicate. It runs on the blocking pool, so it may do I/O.
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }

    /// Wraps a synchronous predicate and returns it shared.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> HealthCheck for HealthFn<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    async fn is_healthy(&self) -> bool {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(healthy) => healthy,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => false,
        }
    }
}

struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy)]
struct Cached {
    status: HealthStatus,
    checked_at: SystemTime,
    evaluated: Instant,
}

/// Cached wrapper around a [`HealthCheck`] predicate.
pub struct HealthMonitor {
    predicate: RwLock<Arc<dyn HealthCheck>>,
    cache: Mutex<Option<Cached>>,
    freshness: Duration,
    timeout: Option<Duration>,
    bus: Bus,
}

impl HealthMonitor {
    /// Creates a monitor with the default (always healthy) predicate.
    pub fn new(freshness: Duration, timeout: Option<Duration>, bus: Bus) -> Self {
        Self {
            predicate: RwLock::new(Arc::new(AlwaysHealthy)),
            cache: Mutex::new(None),
            freshness,
            timeout,
            bus,
        }
    }

    /// Replaces the predicate and invalidates the cache.
    pub(crate) fn set_predicate(&self, predicate: Arc<dyn HealthCheck>) {
        *self.predicate.write().unwrap_or_else(|p| p.into_inner()) = predicate;
        if let Ok(mut cache) = self.cache.try_lock() {
            *cache = None;
        }
    }

    /// Returns the current health, evaluating the predicate if the cache is stale.
    pub async fn check(&self) -> HealthReport {
        let mut cache = self.cache.lock().await;
        if let Some(c) = *cache {
            if c.evaluated.elapsed() < self.freshness {
                return HealthReport {
                    status: c.status,
                    checked_at: c.checked_at,
                    cached: true,
                };
            }
        }

        let status = self.evaluate().await;
        let fresh = Cached {
            status,
            checked_at: SystemTime::now(),
            evaluated: Instant::now(),
        };
        *cache = Some(fresh);

        HealthReport {
            status,
            checked_at: fresh.checked_at,
            cached: false,
        }
    }

    async fn evaluate(&self) -> HealthStatus {
        let predicate = Arc::clone(&self.predicate.read().unwrap_or_else(|p| p.into_inner()));
        let started = Instant::now();
        let fut = std::panic::AssertUnwindSafe(async move { predicate.is_healthy().await })
            .catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r.map_err(|p| panic_message(&*p)),
                Err(_) => Err(format!("health check exceeded {limit:?}")),
            },
            None => fut.await.map_err(|p| panic_message(&*p)),
        };

        match outcome {
            Ok(healthy) => {
                let status = if healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                };
                self.bus.publish(
                    Event::new(EventKind::HealthChecked)
                        .with_reason(status.as_label())
                        .with_elapsed(started.elapsed()),
                );
                status
            }
            Err(info) => {
                tracing::error!(%info, "health check faulted; reporting unhealthy");
                self.bus
                    .publish(Event::new(EventKind::HealthCheckFaulted).with_reason(info));
                HealthStatus::Unhealthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor(freshness: Duration, timeout: Option<Duration>) -> HealthMonitor {
        HealthMonitor::new(freshness, timeout, Bus::new(16))
    }

    #[tokio::test]
    async fn default_predicate_is_healthy() {
        let m = monitor(Duration::from_secs(1), None);
        let report = m.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(!report.cached);
    }

    #[tokio::test]
    async fn cached_within_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let m = monitor(Duration::from_secs(60), None);
        m.set_predicate(HealthFn::arc(move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        }));

        let first = m.check().await;
        let second = m.check().await;
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.checked_at, second.checked_at);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_window_always_reevaluates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let m = monitor(Duration::ZERO, None);
        m.set_predicate(HealthFn::arc(move || {
            c.fetch_add(1, Ordering::SeqCst);
            false
        }));

        assert_eq!(m.check().await.status, HealthStatus::Unhealthy);
        assert_eq!(m.check().await.status, HealthStatus::Unhealthy);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_predicate_is_unhealthy() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let m = HealthMonitor::new(Duration::from_secs(1), None, bus);
        m.set_predicate(HealthFn::arc(|| panic!("sensor offline")));

        assert_eq!(m.check().await.status, HealthStatus::Unhealthy);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::HealthCheckFaulted);
        assert_eq!(ev.reason.as_deref(), Some("sensor offline"));
    }

    struct Hanging;

    #[async_trait]
    impl HealthCheck for Hanging {
        async fn is_healthy(&self) -> bool {
            std::future::pending::<()>().await;
            true
        }
    }

    #[tokio::test]
    async fn blocking_predicate_is_bounded_by_timeout() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let m = HealthMonitor::new(Duration::from_secs(1), Some(Duration::from_millis(50)), bus);
        m.set_predicate(HealthFn::arc(|| {
            std::thread::sleep(Duration::from_millis(800));
            true
        }));

        let started = Instant::now();
        assert_eq!(m.check().await.status, HealthStatus::Unhealthy);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::HealthCheckFaulted);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_predicate_times_out_unhealthy() {
        let m = monitor(Duration::from_secs(1), Some(Duration::from_millis(50)));
        m.set_predicate(Arc::new(Hanging));
        assert_eq!(m.check().await.status, HealthStatus::Unhealthy);
    }
}
