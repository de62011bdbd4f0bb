//! # Event subscribers for the payloadvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and built-in implementations for runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! ExecutionEngine ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//!                                                                  ┌─────┴─────┐
//!                                                                  ▼           ▼
//!                                                             LogWriter   user subscribers
//! ```

mod embedded;
mod subscriber;
mod subscriber_set;

pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
