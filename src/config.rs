//! # Application runtime configuration.
//!
//! Provides [`AppConfig`] centralized settings for the payload application runtime.
//!
//! Config is used in two ways:
//! 1. **Application creation**: `PayloadApplication::builder(config)`
//! 2. **Sequence defaults**: [`SequenceOptions`] fields left unset inherit from config
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited (no global semaphore created)
//! - `timeout = 0s` → no timeout
//! - `health_timeout = 0s` → the health predicate is never timed out
//!
//! ## Environment overlay
//! [`AppConfig::from_env`] starts from defaults and applies `PAYLOAD_*` variables:
//!
//! | Variable                      | Field               | Format        |
//! |-------------------------------|---------------------|---------------|
//! | `PAYLOAD_MAX_CONCURRENT`      | `max_concurrent`    | integer       |
//! | `PAYLOAD_TIMEOUT_MS`          | `timeout`           | milliseconds  |
//! | `PAYLOAD_GRACE_MS`            | `grace`             | milliseconds  |
//! | `PAYLOAD_HEALTH_FRESHNESS_MS` | `health_freshness`  | milliseconds  |
//! | `PAYLOAD_UART_BAUD`           | `uart_baud`         | integer       |
//!
//! Malformed values are logged and ignored.

use std::time::Duration;

/// Global configuration for the payload application runtime.
///
/// ## Field semantics
/// - `grace`: Maximum wait for in-flight sequences on shutdown (`0s` = don't wait)
/// - `max_concurrent`: Global execution limit across all sequences (`0` = unlimited)
/// - `timeout`: Default per-execution timeout (`0s` = none)
/// - `bus_capacity`: Event bus ring buffer size (min 1)
/// - `metrics_capacity`: Number of counter slots in the metrics registry
/// - `health_freshness`: How long a health result is served from cache
/// - `health_timeout`: Upper bound on one health predicate evaluation (`0s` = none)
/// - `handle_os_signals`: Whether `run()` listens for SIGINT/SIGTERM/SIGQUIT
/// - `uart_baud`: Baud rate used when opening UART ports
/// - `can_poll_interval`: Poll period of CAN reception waits
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Maximum time to wait for in-flight executions when shutting down.
    ///
    /// When shutdown starts:
    /// - New dispatches are rejected with `DispatchError::Closed`
    /// - In-flight handlers are cancelled via `CancellationToken`
    /// - The runtime waits up to `grace` for them to return
    /// - If exceeded, `run()` returns `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// Maximum number of sequence executions running at once.
    ///
    /// - `0` = unlimited (no semaphore)
    /// - `n > 0` = at most `n` handlers execute simultaneously
    pub max_concurrent: usize,

    /// Default per-execution timeout.
    ///
    /// Defaults to 30s, sized for the worst-case hardware I/O of a single
    /// sequence (CAN bursts, UART round trips).
    pub timeout: Duration,

    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,

    /// Number of counters the metrics registry can hold.
    pub metrics_capacity: usize,

    /// Freshness window of cached health results.
    pub health_freshness: Duration,

    /// Maximum duration of one health predicate evaluation.
    pub health_timeout: Duration,

    /// Listen for OS termination signals in `run()`.
    pub handle_os_signals: bool,

    /// UART baud rate.
    pub uart_baud: u32,

    /// CAN reception poll interval.
    pub can_poll_interval: Duration,
}

impl AppConfig {
    /// Returns the global concurrency limit as an `Option`.
    ///
    /// - `None` → unlimited (no semaphore)
    /// - `Some(n)` → at most `n` concurrent executions
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent == 0 {
            None
        } else {
            Some(self.max_concurrent)
        }
    }

    /// Returns the default execution timeout as an `Option`.
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout == Duration::ZERO {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Returns the health predicate timeout as an `Option`.
    #[inline]
    pub fn health_timeout(&self) -> Option<Duration> {
        if self.health_timeout == Duration::ZERO {
            None
        } else {
            Some(self.health_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Builds a config from defaults overlaid with `PAYLOAD_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Applies overrides from a key lookup (environment-shaped).
    pub(crate) fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(n) = parse_var(&lookup, "PAYLOAD_MAX_CONCURRENT") {
            match usize::try_from(n) {
                Ok(v) => self.max_concurrent = v,
                Err(_) => tracing::warn!(value = n, "PAYLOAD_MAX_CONCURRENT out of range; ignored"),
            }
        }
        if let Some(ms) = parse_var(&lookup, "PAYLOAD_TIMEOUT_MS") {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "PAYLOAD_GRACE_MS") {
            self.grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "PAYLOAD_HEALTH_FRESHNESS_MS") {
            self.health_freshness = Duration::from_millis(ms);
        }
        if let Some(baud) = parse_var(&lookup, "PAYLOAD_UART_BAUD") {
            match u32::try_from(baud) {
                Ok(b) => self.uart_baud = b,
                Err(_) => tracing::warn!(value = baud, "PAYLOAD_UART_BAUD out of range; ignored"),
            }
        }
        self
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "malformed config variable; ignored");
            None
        }
    }
}

impl Default for AppConfig {
    /// Default configuration:
    ///
    /// - `grace = 10s`
    /// - `max_concurrent = 0` (unlimited; exclusive peripherals are serialized per device)
    /// - `timeout = 30s`
    /// - `bus_capacity = 1024`
    /// - `metrics_capacity = 16`
    /// - `health_freshness = 1s`
    /// - `health_timeout = 5s`
    /// - `handle_os_signals = true`
    /// - `uart_baud = 9600`
    /// - `can_poll_interval = 100ms`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            max_concurrent: 0,
            timeout: Duration::from_secs(30),
            bus_capacity: 1024,
            metrics_capacity: 16,
            health_freshness: Duration::from_secs(1),
            health_timeout: Duration::from_secs(5),
            handle_os_signals: true,
            uart_baud: 9600,
            can_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Per-sequence execution overrides.
///
/// Unset fields inherit from [`AppConfig`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceOptions {
    /// Maximum concurrent executions of this sequence (`None` = no per-sequence limit).
    ///
    /// `Some(1)` makes executions of this sequence strictly FIFO.
    pub max_concurrent: Option<usize>,

    /// Timeout override (`Some(Duration::ZERO)` disables the timeout for this sequence).
    pub timeout: Option<Duration>,
}

impl SequenceOptions {
    /// Serial (FIFO) execution of the sequence.
    pub fn serial() -> Self {
        Self {
            max_concurrent: Some(1),
            timeout: None,
        }
    }

    /// Returns options with the given timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns options with the given concurrency limit (`0` = unlimited).
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = if n == 0 { None } else { Some(n) };
        self
    }

    /// Resolves the effective timeout against the global config.
    pub fn effective_timeout(&self, cfg: &AppConfig) -> Option<Duration> {
        match self.timeout {
            Some(d) if d == Duration::ZERO => None,
            Some(d) => Some(d),
            None => cfg.default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sentinels_map_to_none() {
        let cfg = AppConfig {
            max_concurrent: 0,
            timeout: Duration::ZERO,
            health_timeout: Duration::ZERO,
            bus_capacity: 0,
            ..AppConfig::default()
        };
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.default_timeout(), None);
        assert_eq!(cfg.health_timeout(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn overlay_applies_valid_and_skips_malformed() {
        let vars: HashMap<&str, &str> = [
            ("PAYLOAD_MAX_CONCURRENT", "4"),
            ("PAYLOAD_TIMEOUT_MS", "nope"),
            ("PAYLOAD_GRACE_MS", "250"),
            ("PAYLOAD_UART_BAUD", "115200"),
        ]
        .into_iter()
        .collect();

        let cfg = AppConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.max_concurrent, 4);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.grace, Duration::from_millis(250));
        assert_eq!(cfg.uart_baud, 115_200);
    }

    #[test]
    fn overlay_ignores_out_of_range_numbers() {
        let vars: HashMap<&str, &str> = [
            ("PAYLOAD_MAX_CONCURRENT", "18446744073709551615"),
            ("PAYLOAD_UART_BAUD", "4294967296"),
        ]
        .into_iter()
        .collect();

        let cfg = AppConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        // Fits on 64-bit targets; narrower targets keep the default.
        assert_eq!(cfg.max_concurrent, usize::try_from(u64::MAX).unwrap_or(0));
        assert_eq!(cfg.uart_baud, AppConfig::default().uart_baud);
    }

    #[test]
    fn sequence_options_resolve_timeout() {
        let cfg = AppConfig::default();
        assert_eq!(
            SequenceOptions::default().effective_timeout(&cfg),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            SequenceOptions::default()
                .with_timeout(Duration::ZERO)
                .effective_timeout(&cfg),
            None
        );
        assert_eq!(SequenceOptions::serial().max_concurrent, Some(1));
        assert_eq!(SequenceOptions::default().with_max_concurrent(0).max_concurrent, None);
    }
}
