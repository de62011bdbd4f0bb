//! # Built-in subscribers
//!
//! - [`LogWriter`]: writes events through `tracing`.

mod log;

pub use log::LogWriter;
