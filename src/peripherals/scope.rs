//! # Invocation scope for peripheral access.
//!
//! An [`InvocationScope`] ties peripheral calls to one handler invocation:
//! - its **cancellation token** aborts waits (lock acquisition, blocking calls, CAN polling);
//! - its **expiry flag** is set by the engine when the handler returns, after which
//!   every call made through the scope fails with `ContextExpired`.
//!
//! Blocking driver calls run through [`InvocationScope::blocking`]:
//! ```text
//! blocking(f)
//!   ├─ expired?            ──► Err(ContextExpired)
//!   ├─ spawn_blocking(f)
//!   └─ select!
//!        ├─ f returns      ──► Ok(value)       (driver panic is resumed in the caller)
//!        └─ token cancelled──► Err(Cancelled)  (f keeps running to completion on the pool)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::PeripheralError;

/// Cancellation and lifetime of one handler invocation.
#[derive(Clone, Debug)]
pub struct InvocationScope {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
}

impl InvocationScope {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancellation token of the invocation.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Marks the scope expired. Called by the engine once the handler returned.
    pub(crate) fn expire(&self) {
        self.expired.store(true, Ordering::Release);
    }

    /// Fails if the scope is expired or cancelled.
    pub fn ensure_live(&self) -> Result<(), PeripheralError> {
        if self.is_expired() {
            return Err(PeripheralError::ContextExpired);
        }
        if self.is_cancelled() {
            return Err(PeripheralError::Cancelled);
        }
        Ok(())
    }

    /// Runs a blocking driver call on the blocking pool, abandoning the wait on cancellation.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, PeripheralError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_live()?;
        let join = tokio::task::spawn_blocking(f);
        tokio::select! {
            res = join => match res {
                Ok(v) => Ok(v),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(PeripheralError::Cancelled),
            },
            _ = self.token.cancelled() => Err(PeripheralError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn expired_scope_rejects_calls() {
        let scope = InvocationScope::new(CancellationToken::new());
        assert_eq!(scope.blocking(|| 7).await, Ok(7));
        scope.expire();
        assert_eq!(scope.blocking(|| 7).await, Err(PeripheralError::ContextExpired));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_abandons_blocking_call() {
        let token = CancellationToken::new();
        let scope = InvocationScope::new(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        let res = scope
            .blocking(|| std::thread::sleep(Duration::from_millis(500)))
            .await;
        canceller.await.unwrap();

        assert_eq!(res, Err(PeripheralError::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
