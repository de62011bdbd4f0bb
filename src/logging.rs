//! Process-wide `tracing` subscriber setup.
//!
//! `RUST_LOG` always wins; otherwise the filter is built from [`LogConfig::level`]
//! (with `debug` forced when [`LogConfig::from_env`] sees `DEBUG`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-field lines.
    Pretty,
    /// One line per event: timestamp level target message fields.
    #[default]
    Compact,
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default level directive (`"info"`, `"debug"`, ...).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Default config, switched to `debug` when the `DEBUG` environment variable is set.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if std::env::var_os("DEBUG").is_some() {
            cfg.level = "debug".to_string();
        }
        cfg
    }
}

fn filter_expression(level: &str) -> String {
    format!("{level},tokio=warn,runtime=warn")
}

/// Installs the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(cfg: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_expression(&cfg.level)));

    let registry = tracing_subscriber::registry().with(filter);
    match cfg.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| format!("failed to initialize pretty logging: {e}")),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("failed to initialize compact logging: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_internals_stay_quiet() {
        assert_eq!(filter_expression("debug"), "debug,tokio=warn,runtime=warn");
    }
}
