//! # Per-invocation execution context.
//!
//! Owned by the handler for the duration of one invocation. Peripheral handles
//! obtained from it are bound to the invocation scope: they stop waiting when the
//! invocation is cancelled and fail with `ContextExpired` once the handler returned,
//! even if a clone escaped into a detached task.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PeripheralError, SequenceError};
use crate::metrics::MetricsRegistry;
use crate::peripherals::{Can, ClientHandle, Gpio, Hardware, InvocationScope, Uart};
use crate::sequences::request::{InvocationRequest, RequestId};

/// Everything a handler can reach during one invocation.
pub struct ExecutionContext {
    request: InvocationRequest,
    scope: InvocationScope,
    hardware: Hardware,
    metrics: Arc<MetricsRegistry>,
}

impl ExecutionContext {
    pub(crate) fn new(
        request: InvocationRequest,
        scope: InvocationScope,
        hardware: Hardware,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            request,
            scope,
            hardware,
            metrics,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request.request_id()
    }

    pub fn sequence_name(&self) -> &str {
        self.request.sequence_name()
    }

    /// Raw request parameters.
    pub fn params(&self) -> &[u8] {
        self.request.params()
    }

    /// Parameters as UTF-8 text, trimmed of surrounding whitespace and NULs.
    pub fn params_str(&self) -> Result<&str, SequenceError> {
        std::str::from_utf8(self.request.params())
            .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
            .map_err(|e| SequenceError::InvalidParams {
                reason: e.to_string(),
            })
    }

    /// Payload controller client.
    pub fn client(&self) -> ClientHandle {
        self.hardware.client_for(&self.scope)
    }

    pub fn gpio(&self) -> Result<Gpio, PeripheralError> {
        self.scope.ensure_live()?;
        self.hardware.gpio_for(&self.scope)
    }

    pub fn uart(&self) -> Result<Uart, PeripheralError> {
        self.scope.ensure_live()?;
        self.hardware.uart_for(&self.scope)
    }

    pub fn can(&self) -> Result<Can, PeripheralError> {
        self.scope.ensure_live()?;
        self.hardware.can_for(&self.scope)
    }

    /// Application-wide counters.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Cancellation token of this invocation (cancelled on timeout, explicit cancel, shutdown).
    pub fn token(&self) -> &CancellationToken {
        self.scope.token()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Returns `Err(Cancelled)` once the invocation was cancelled.
    pub fn ensure_live(&self) -> Result<(), SequenceError> {
        self.scope.ensure_live().map_err(SequenceError::from)
    }

    /// Sleeps for `d`, returning early with `Cancelled` on cancellation.
    pub async fn sleep(&self, d: Duration) -> Result<(), SequenceError> {
        tokio::select! {
            biased;
            _ = self.scope.token().cancelled() => Err(SequenceError::Cancelled),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("sequence", &self.request.sequence_name())
            .field("request_id", &self.request.request_id())
            .field("cancelled", &self.scope.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(params: &str) -> (ExecutionContext, InvocationScope) {
        let scope = InvocationScope::new(CancellationToken::new());
        let ctx = ExecutionContext::new(
            InvocationRequest::new("HelloWorld", params),
            scope.clone(),
            Hardware::new(),
            Arc::new(MetricsRegistry::new(4)),
        );
        (ctx, scope)
    }

    #[test]
    fn params_are_trimmed() {
        let (ctx, _) = ctx("  0x123 0x11\n\0");
        assert_eq!(ctx.params_str().unwrap(), "0x123 0x11");
    }

    #[test]
    fn missing_driver_is_unavailable() {
        let (ctx, _) = ctx("");
        assert_eq!(ctx.uart().err(), Some(PeripheralError::Unavailable { class: "uart" }));
    }

    #[tokio::test]
    async fn sleep_stops_on_cancel() {
        let (ctx, scope) = ctx("");
        scope.token().cancel();
        assert_eq!(ctx.sleep(Duration::from_secs(60)).await, Err(SequenceError::Cancelled));
        assert!(ctx.ensure_live().unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn expired_scope_rejects_peripherals() {
        let (ctx, scope) = ctx("");
        scope.expire();
        assert_eq!(ctx.gpio().err(), Some(PeripheralError::ContextExpired));
    }
}
