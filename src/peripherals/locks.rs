//! # Per-device mutual exclusion for exclusive peripherals.
//!
//! [`PeripheralLocks`] hands out one async mutex per physical device
//! ([`PeripheralId`]). Acquisition returns an owned [`PeripheralGuard`];
//! dropping it releases the device on every exit path.
//!
//! ## Rules
//! - Two holders of the same device never coexist.
//! - Waiters are served FIFO (tokio mutex fairness).
//! - Waiting is cancellable through the invocation token.
//! - Multi-device acquisition locks in sorted order, so concurrent
//!   acquisitions of overlapping sets cannot deadlock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::PeripheralError;
use crate::peripherals::scope::InvocationScope;

/// Peripheral class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeripheralClass {
    Gpio,
    Uart,
    Can,
}

impl PeripheralClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeripheralClass::Gpio => "gpio",
            PeripheralClass::Uart => "uart",
            PeripheralClass::Can => "can",
        }
    }
}

/// Identity of one exclusive physical device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId {
    pub class: PeripheralClass,
    pub device: String,
}

impl PeripheralId {
    pub fn new(class: PeripheralClass, device: impl Into<String>) -> Self {
        Self {
            class,
            device: device.into(),
        }
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class.as_str(), self.device)
    }
}

/// Exclusive hold on one device. Released on drop.
pub struct PeripheralGuard {
    id: PeripheralId,
    _guard: OwnedMutexGuard<()>,
}

impl PeripheralGuard {
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }
}

impl Drop for PeripheralGuard {
    fn drop(&mut self) {
        tracing::trace!(device = %self.id, "peripheral released");
    }
}

/// Registry of per-device locks.
#[derive(Clone, Default)]
pub struct PeripheralLocks {
    inner: Arc<Mutex<HashMap<PeripheralId, Arc<AsyncMutex<()>>>>>,
}

impl PeripheralLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &PeripheralId) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(map.entry(id.clone()).or_default())
    }

    /// Waits for exclusive access to `id`, or fails with `Cancelled`.
    pub async fn acquire(
        &self,
        id: PeripheralId,
        scope: &InvocationScope,
    ) -> Result<PeripheralGuard, PeripheralError> {
        scope.ensure_live()?;
        let lock = self.lock_for(&id);
        let guard = tokio::select! {
            biased;
            _ = scope.token().cancelled() => return Err(PeripheralError::Cancelled),
            g = lock.lock_owned() => g,
        };
        tracing::trace!(device = %id, "peripheral acquired");
        Ok(PeripheralGuard { id, _guard: guard })
    }

    /// Acquires exclusive access to several devices (sorted, deduplicated).
    pub async fn acquire_all(
        &self,
        mut ids: Vec<PeripheralId>,
        scope: &InvocationScope,
    ) -> Result<Vec<PeripheralGuard>, PeripheralError> {
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.acquire(id, scope).await?);
        }
        Ok(guards)
    }

    /// Attempts to take `id` without waiting.
    pub fn try_acquire(&self, id: PeripheralId) -> Option<PeripheralGuard> {
        let lock = self.lock_for(&id);
        lock.try_lock_owned()
            .ok()
            .map(|guard| PeripheralGuard { id, _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn uart0() -> PeripheralId {
        PeripheralId::new(PeripheralClass::Uart, "/dev/ttyS0")
    }

    #[tokio::test]
    async fn second_holder_waits_until_release() {
        let locks = PeripheralLocks::new();
        let scope = InvocationScope::new(CancellationToken::new());

        let g = locks.acquire(uart0(), &scope).await.unwrap();
        assert_eq!(g.id().to_string(), "uart:/dev/ttyS0");
        assert!(locks.try_acquire(uart0()).is_none());
        assert!(locks
            .try_acquire(PeripheralId::new(PeripheralClass::Uart, "/dev/ttyS1"))
            .is_some());

        drop(g);
        assert!(locks.try_acquire(uart0()).is_some());
    }

    #[tokio::test]
    async fn waiting_is_cancellable() {
        let locks = PeripheralLocks::new();
        let _held = locks.try_acquire(uart0()).unwrap();

        let token = CancellationToken::new();
        let scope = InvocationScope::new(token.clone());
        token.cancel();
        assert!(matches!(
            locks.acquire(uart0(), &scope).await,
            Err(PeripheralError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn acquire_all_dedups() {
        let locks = PeripheralLocks::new();
        let scope = InvocationScope::new(CancellationToken::new());
        let pin = |n: u32| PeripheralId::new(PeripheralClass::Gpio, n.to_string());

        let guards = locks
            .acquire_all(vec![pin(2), pin(1), pin(2)], &scope)
            .await
            .unwrap();
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].id(), &pin(1));
    }
}
