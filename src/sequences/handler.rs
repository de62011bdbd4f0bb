//! # Sequence handlers.
//!
//! A sequence is the unit of work ground operators invoke by name. Its behaviour is a
//! [`SequenceHandler`]; [`HandlerFn`] adapts a plain async closure.
//!
//! A handler receives an owned [`ExecutionContext`] for exactly one invocation and
//! should watch its cancellation token to stop promptly on timeout or cancel.
//!
//! ## Example
//! ```rust
//! use payloadvisor::{ExecutionContext, HandlerFn, HandlerRef, SequenceError};
//!
//! let hello: HandlerRef = HandlerFn::arc(|ctx: ExecutionContext| async move {
//!     tracing::info!(params = %String::from_utf8_lossy(ctx.params()), "hello");
//!     Ok::<_, SequenceError>(())
//! });
//! # let _ = hello;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SequenceError;
use crate::sequences::context::ExecutionContext;

/// Value returned by a successful handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceOutput {
    message: Option<String>,
}

impl SequenceOutput {
    /// Output without a message.
    pub fn done() -> Self {
        Self::default()
    }

    /// Output carrying a short message for the requester.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<()> for SequenceOutput {
    fn from(_: ()) -> Self {
        Self::done()
    }
}

impl From<String> for SequenceOutput {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<&str> for SequenceOutput {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

/// # Behaviour of a named sequence.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use payloadvisor::{ExecutionContext, SequenceError, SequenceHandler, SequenceOutput};
///
/// struct PowerCycle;
///
/// #[async_trait]
/// impl SequenceHandler for PowerCycle {
///     async fn execute(&self, ctx: ExecutionContext) -> Result<SequenceOutput, SequenceError> {
///         ctx.ensure_live()?;
///         Ok(SequenceOutput::text("cycled"))
///     }
/// }
/// ```
#[async_trait]
pub trait SequenceHandler: Send + Sync + 'static {
    /// Runs one invocation.
    async fn execute(&self, ctx: ExecutionContext) -> Result<SequenceOutput, SequenceError>;
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn SequenceHandler>;

/// Closure-backed handler: `Fn(ExecutionContext) -> impl Future<Output = Result<O, SequenceError>>`.
///
/// Every invocation calls the closure again and awaits a fresh future.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler as a shared [`HandlerRef`]-compatible `Arc`.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, O> SequenceHandler for HandlerFn<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, SequenceError>> + Send + 'static,
    O: Into<SequenceOutput> + Send + 'static,
{
    async fn execute(&self, ctx: ExecutionContext) -> Result<SequenceOutput, SequenceError> {
        (self.f)(ctx).await.map(Into::into)
    }
}
