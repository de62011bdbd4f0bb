//! Error types used by the payloadvisor runtime, its components and handlers.
//!
//! This module defines the error taxonomy of the runtime:
//!
//! - [`RegistryError`]: sequence registration/lookup failures (setup time).
//! - [`DispatchError`]: per-request failures reported to the requester.
//! - [`MetricsError`]: counter index violations.
//! - [`RuntimeError`]: application lifecycle failures.
//! - [`PeripheralError`]: hardware adapter failures (sentinels already translated).
//! - [`SequenceError`]: errors returned by sequence handlers.
//!
//! Every type provides `as_label` (stable snake_case for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::sequences::RequestId;

/// # Errors produced by the sequence registry.
///
/// These are programmer errors and surface immediately to the registering caller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Name is empty or longer than [`MAX_SEQUENCE_NAME_LEN`](crate::MAX_SEQUENCE_NAME_LEN) characters.
    #[error("invalid sequence name {name:?}: length must be 1..={max} characters")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Maximum accepted length.
        max: usize,
    },

    /// A handler is already registered under this name.
    #[error("sequence {name:?} is already registered")]
    DuplicateName {
        /// Offending name.
        name: String,
    },

    /// No handler is registered under this name.
    #[error("sequence {name:?} not found")]
    NotFound {
        /// Requested name.
        name: String,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::RegistryError;
    ///
    /// let err = RegistryError::DuplicateName { name: "HelloWorld".into() };
    /// assert_eq!(err.as_label(), "registry_duplicate_name");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::InvalidName { .. } => "registry_invalid_name",
            RegistryError::DuplicateName { .. } => "registry_duplicate_name",
            RegistryError::NotFound { .. } => "registry_not_found",
        }
    }
}

/// # Errors produced while dispatching an invocation request.
///
/// Captured per request and reported to the requester; never crash the process.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No sequence is registered under the requested name. Nothing was invoked.
    #[error("sequence {name:?} not found")]
    SequenceNotFound {
        /// Requested name.
        name: String,
    },

    /// Execution exceeded its timeout; the handler was signalled to cancel.
    #[error("sequence {name:?} timed out after {timeout:?}")]
    Timeout {
        /// Sequence name.
        name: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Request was cancelled (before start, or cooperatively while running).
    #[error("request {request_id} cancelled")]
    Cancelled {
        /// Cancelled request.
        request_id: RequestId,
    },

    /// Handler panicked; the fault was isolated.
    #[error("sequence {name:?} faulted: {error}")]
    HandlerFault {
        /// Sequence name.
        name: String,
        /// Panic payload rendered as text.
        error: String,
    },

    /// Handler returned an error.
    #[error("sequence {name:?} failed: {error}")]
    Failed {
        /// Sequence name.
        name: String,
        /// The handler's error.
        error: SequenceError,
    },

    /// Another in-flight request already uses this id.
    #[error("request id {request_id} is already in flight")]
    DuplicateRequest {
        /// Conflicting id.
        request_id: RequestId,
    },

    /// The engine is shut down and accepts no new requests.
    #[error("execution engine is closed")]
    Closed,
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::DispatchError;
    ///
    /// let err = DispatchError::SequenceNotFound { name: "Nope".into() };
    /// assert_eq!(err.as_label(), "dispatch_sequence_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::SequenceNotFound { .. } => "dispatch_sequence_not_found",
            DispatchError::Timeout { .. } => "dispatch_timeout",
            DispatchError::Cancelled { .. } => "dispatch_cancelled",
            DispatchError::HandlerFault { .. } => "dispatch_handler_fault",
            DispatchError::Failed { .. } => "dispatch_failed",
            DispatchError::DuplicateRequest { .. } => "dispatch_duplicate_request",
            DispatchError::Closed => "dispatch_closed",
        }
    }
}

/// # Errors produced by the metrics registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsError {
    /// Counter index is not below the registry capacity.
    #[error("counter index {index} out of range (capacity {capacity})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Registry capacity.
        capacity: usize,
    },

    /// Requested used-counter count exceeds capacity.
    #[error("used counter {requested} exceeds capacity {capacity}")]
    CapacityExceeded {
        /// Requested count.
        requested: usize,
        /// Registry capacity.
        capacity: usize,
    },
}

impl MetricsError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MetricsError::IndexOutOfRange { .. } => "metrics_index_out_of_range",
            MetricsError::CapacityExceeded { .. } => "metrics_capacity_exceeded",
        }
    }
}

/// # Errors produced by the application lifecycle.
///
/// An error from [`PayloadApplication::run`](crate::PayloadApplication::run) is
/// unrecoverable; the caller is expected to exit with a non-zero status.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The application is running (or has already run); setup calls are rejected.
    #[error("application is already running")]
    AlreadyRunning,

    /// A registration performed through the application failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Shutdown grace period was exceeded; some sequences were still executing.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of sequences that did not finish in time.
        stuck: Vec<String>,
    },

    /// The transport failed unrecoverably.
    #[error("transport failed: {error}")]
    Transport {
        /// Transport error rendered with its cause chain.
        error: String,
    },

    /// OS signal handlers could not be installed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyRunning => "runtime_already_running",
            RuntimeError::Registry(e) => e.as_label(),
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Transport { .. } => "runtime_transport_failed",
            RuntimeError::Signal(_) => "runtime_signal_failed",
        }
    }
}

/// # Errors produced by peripheral adapters.
///
/// Raw driver sentinels (`-1`) are converted into [`PeripheralError::Io`] at the
/// adapter boundary and never reach engine logic.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    /// No driver of this class is installed.
    #[error("{class} driver is not available")]
    Unavailable {
        /// Peripheral class (`gpio`, `uart`, `can`).
        class: &'static str,
    },

    /// The driver reports no device at the requested index/name.
    #[error("no {class} device {device:?}")]
    NoDevice {
        /// Peripheral class.
        class: &'static str,
        /// Requested device.
        device: String,
    },

    /// Driver call reported an error status.
    #[error("{class} {op} failed on {device} (status {code})")]
    Io {
        /// Peripheral class.
        class: &'static str,
        /// Operation name.
        op: &'static str,
        /// Device (pin, port, channel).
        device: String,
        /// Raw status code reported by the driver.
        code: i32,
    },

    /// Opening an exclusive device failed.
    #[error("failed to open {device}: {reason}")]
    Open {
        /// Device name.
        device: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// CAN frame is malformed (bad id, bad byte, more than 8 bytes).
    #[error("invalid CAN frame: {reason}")]
    InvalidFrame {
        /// What is wrong.
        reason: String,
    },

    /// Payload controller call failed.
    #[error("client call {call} failed: {reason}")]
    Client {
        /// Call name.
        call: &'static str,
        /// Transport-reported reason.
        reason: String,
    },

    /// The invocation was cancelled while waiting on the peripheral.
    #[error("peripheral operation cancelled")]
    Cancelled,

    /// The execution context was used after its handler returned.
    #[error("execution context expired")]
    ContextExpired,
}

impl PeripheralError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PeripheralError::Unavailable { .. } => "peripheral_unavailable",
            PeripheralError::NoDevice { .. } => "peripheral_no_device",
            PeripheralError::Io { .. } => "peripheral_io",
            PeripheralError::Open { .. } => "peripheral_open",
            PeripheralError::InvalidFrame { .. } => "peripheral_invalid_frame",
            PeripheralError::Client { .. } => "peripheral_client",
            PeripheralError::Cancelled => "peripheral_cancelled",
            PeripheralError::ContextExpired => "peripheral_context_expired",
        }
    }
}

/// # Errors returned by sequence handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// Handler observed cancellation and stopped.
    #[error("cancelled")]
    Cancelled,

    /// Parameters could not be interpreted.
    #[error("invalid params: {reason}")]
    InvalidParams {
        /// What is wrong.
        reason: String,
    },

    /// Peripheral or client call failed.
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    /// Metrics update failed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// Any other handler failure.
    #[error("{error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },
}

impl SequenceError {
    /// Convenience constructor for [`SequenceError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        SequenceError::Failed {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SequenceError::Cancelled => "sequence_cancelled",
            SequenceError::InvalidParams { .. } => "sequence_invalid_params",
            SequenceError::Peripheral(e) => e.as_label(),
            SequenceError::Metrics(e) => e.as_label(),
            SequenceError::Failed { .. } => "sequence_failed",
        }
    }

    /// Indicates whether the error means the handler stopped due to cancellation.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::{PeripheralError, SequenceError};
    ///
    /// assert!(SequenceError::Cancelled.is_cancellation());
    /// assert!(SequenceError::from(PeripheralError::Cancelled).is_cancellation());
    /// assert!(!SequenceError::failed("boom").is_cancellation());
    /// ```
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            SequenceError::Cancelled | SequenceError::Peripheral(PeripheralError::Cancelled)
        )
    }
}

impl From<std::io::Error> for SequenceError {
    fn from(e: std::io::Error) -> Self {
        SequenceError::failed(e.to_string())
    }
}
