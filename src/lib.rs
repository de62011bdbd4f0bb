//! # payloadvisor
//!
//! **Payloadvisor** is the application runtime for satellite payload computers.
//!
//! Ground operators invoke named **sequences** (units of payload work) through a
//! transport; the runtime dispatches them to registered handlers under bounded
//! concurrency with timeouts and fault isolation, answers health polls and
//! exports payload counters as telemetry.
//!
//! ## Architecture
//! ```text
//!                ┌───────────────────────────┐
//!  ground link ─►│ Transport::serve(gateway) │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ PayloadApplication                                               │
//! │  - SequenceRegistry   (name → handler, options)                  │
//! │  - ExecutionEngine    (slots, timeouts, panic isolation, cancel) │
//! │  - HealthMonitor      (cached predicate)                         │
//! │  - MetricsRegistry    (fixed-capacity named counters)            │
//! │  - Bus                (broadcast events)                         │
//! └──────┬─────────────────────────────┬─────────────────────────────┘
//!        ▼                             ▼
//!  handler(ExecutionContext)     subscriber_listener ──► SubscriberSet ──► LogWriter, ...
//!        │
//!        ├─► ClientHandle   (location, power, file staging)
//!        └─► Gpio / Uart / Can sessions
//!               └─► PeripheralLocks (one holder per device) ──► blocking drivers
//! ```
//!
//! ## Execution of one request
//! ```text
//! dispatch(request)
//!   ├─► lookup ───────────────► unknown: SequenceNotFound
//!   ├─► wait for slot ────────► cancelled: Cancelled
//!   ├─► SequenceStarting
//!   ├─► handler on its own task (catch_unwind)
//!   └─► wait with timeout
//!         ├─ Ok        ──► SequenceCompleted
//!         ├─ Err       ──► SequenceFailed | SequenceCancelled
//!         ├─ panic     ──► HandlerFaulted
//!         └─ elapsed   ──► TimeoutHit (cancel signalled, slot held until return)
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                                 |
//! |-------------------|---------------------------------------------------------|----------------------------------------------------|
//! | **Sequences**     | Named handlers, closures or trait objects.              | [`SequenceHandler`], [`HandlerFn`], [`ExecutionContext`] |
//! | **Execution**     | Bounded, timed, isolated dispatch with cancellation.    | [`ExecutionEngine`], [`InvocationRequest`]         |
//! | **Peripherals**   | Scoped, exclusive GPIO/UART/CAN sessions.               | [`Hardware`], [`peripherals`]                      |
//! | **Health**        | Cached liveness predicate.                              | [`HealthCheck`], [`HealthFn`], [`HealthMonitor`]   |
//! | **Metrics**       | Telemetry counters.                                     | [`MetricsRegistry`]                                |
//! | **Subscriber API**| Runtime events for logging and telemetry.               | [`Subscribe`], [`LogWriter`]                       |
//! | **Errors**        | Typed errors with stable labels.                        | [`DispatchError`], [`RuntimeError`], ...           |
//! | **Configuration** | Runtime settings with env overlay.                      | [`AppConfig`], [`SequenceOptions`]                 |
//!
//! ## Optional features
//! - `logging` (default): [`init_logging`] installs a `tracing-subscriber` with an env filter.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use payloadvisor::{
//!     AppConfig, ExecutionContext, HandlerFn, InvocationRequest, PayloadApplication,
//!     SequenceError,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = PayloadApplication::new(AppConfig::default());
//!     app.mount_sequence(
//!         "HelloFriend",
//!         HandlerFn::arc(|ctx: ExecutionContext| async move {
//!             ctx.metrics().inc_counter(0)?;
//!             Ok::<_, SequenceError>(format!("hello {}", ctx.params_str()?))
//!         }),
//!     )?;
//!
//!     let out = app.dispatch(InvocationRequest::new("HelloFriend", "ground")).await?;
//!     assert_eq!(out.message(), Some("hello ground"));
//!     assert_eq!(app.metrics().value(0)?, 1);
//!     Ok(())
//! }
//! ```

mod app;
mod config;
mod engine;
mod error;
mod health;
#[cfg(feature = "logging")]
mod logging;
mod metrics;
mod sequences;
mod shutdown;
mod transport;

pub mod events;
pub mod peripherals;
pub mod sim;
pub mod subscribers;

/// Maximum length of a sequence name, in characters.
pub const MAX_SEQUENCE_NAME_LEN: usize = 16;

// ---- Public re-exports ----

pub use app::{AppBuilder, PayloadApplication, ShutdownHandle};
pub use config::{AppConfig, SequenceOptions};
pub use engine::{ExecutionEngine, ExecutionStats, StatsSnapshot};
pub use error::{
    DispatchError, MetricsError, PeripheralError, RegistryError, RuntimeError, SequenceError,
};
pub use events::{Bus, Event, EventKind};
pub use health::{HealthCheck, HealthFn, HealthMonitor, HealthReport, HealthStatus};
pub use metrics::{CounterSample, MetricsRegistry};
pub use peripherals::Hardware;
pub use sequences::{
    ExecutionContext, HandlerFn, HandlerRef, InvocationRequest, RequestId, SequenceHandler,
    SequenceOutput, SequenceRegistry,
};
pub use shutdown::wait_for_shutdown_signal;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use transport::{Gateway, ScriptedTransport, Step, StepOutcome, Transport};

#[cfg(feature = "logging")]
pub use logging::{init_logging, LogConfig, LogFormat};

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_render() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("bad pin");
        assert_eq!(panic_message(&*boxed), "bad pin");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bad port"));
        assert_eq!(panic_message(&*boxed), "bad port");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
