//! # Payload metrics: fixed-capacity named counters.
//!
//! [`MetricsRegistry`] holds up to `capacity` counters addressed by index.
//! Handlers mutate counters concurrently with telemetry export reading them.
//!
//! ## Layout
//! ```text
//! names : RwLock<Vec<Arc<str>>>   len() == used_counter  (grows only)
//! values: [AtomicU64; capacity]   independent of names
//! ```
//!
//! ## Rules
//! - `used_counter <= capacity`, and every index below `used_counter` has a name
//!   (undefined names below a newly used index default to `Counter {i}`).
//! - [`define_counter`](MetricsRegistry::define_counter) changes the name only; the value persists.
//! - [`inc_counter`](MetricsRegistry::inc_counter) is a single atomic add (no lost updates).
//! - [`snapshot`](MetricsRegistry::snapshot) reads each value atomically; cross-counter
//!   consistency is not guaranteed (counters are independent metrics).
//!
//! ## Example
//! ```rust
//! use payloadvisor::MetricsRegistry;
//!
//! let metrics = MetricsRegistry::new(16);
//! metrics.define_counter(1, "MetricName_1").unwrap();
//! metrics.inc_counter(1).unwrap();
//! metrics.inc_counter(1).unwrap();
//!
//! let snap = metrics.snapshot();
//! assert_eq!(snap.len(), 2);
//! assert_eq!(snap[0].name.as_ref(), "Counter 0");
//! assert_eq!((snap[1].name.as_ref(), snap[1].value), ("MetricName_1", 2));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::MetricsError;

/// One exported counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterSample {
    /// Counter index.
    pub index: usize,
    /// Counter name at snapshot time.
    pub name: Arc<str>,
    /// Counter value at snapshot time.
    pub value: u64,
}

/// Thread-safe fixed-capacity counter store.
pub struct MetricsRegistry {
    names: RwLock<Vec<Arc<str>>>,
    values: Box<[AtomicU64]>,
}

impl MetricsRegistry {
    /// Creates an empty registry with `capacity` counter slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            names: RwLock::new(Vec::with_capacity(capacity)),
            values: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of counter slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Number of counters in use (every index below it has a name).
    pub fn used_counter(&self) -> usize {
        self.read_names().len()
    }

    /// Sets the name of counter `index`, keeping its value.
    ///
    /// Extends `used_counter` to `index + 1` if needed.
    pub fn define_counter(&self, index: usize, name: impl Into<Arc<str>>) -> Result<(), MetricsError> {
        self.check_index(index)?;
        let mut names = self.write_names();
        grow_to(&mut names, index + 1);
        names[index] = name.into();
        Ok(())
    }

    /// Atomically increments counter `index` by one and returns the new value.
    ///
    /// Extends `used_counter` to `index + 1` if needed.
    pub fn inc_counter(&self, index: usize) -> Result<u64, MetricsError> {
        self.add(index, 1)
    }

    /// Atomically adds `delta` to counter `index` and returns the new value.
    pub fn add(&self, index: usize, delta: u64) -> Result<u64, MetricsError> {
        self.check_index(index)?;
        self.ensure_used(index + 1);
        Ok(self.values[index].fetch_add(delta, Ordering::Relaxed) + delta)
    }

    /// Overwrites the value of counter `index`.
    pub fn set_counter(&self, index: usize, value: u64) -> Result<(), MetricsError> {
        self.check_index(index)?;
        self.ensure_used(index + 1);
        self.values[index].store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Raises `used_counter` to `n`, naming new counters `Counter {i}`.
    ///
    /// Never shrinks: a smaller `n` is a no-op.
    pub fn set_used(&self, n: usize) -> Result<(), MetricsError> {
        if n > self.capacity() {
            return Err(MetricsError::CapacityExceeded {
                requested: n,
                capacity: self.capacity(),
            });
        }
        self.ensure_used(n);
        Ok(())
    }

    /// Returns the current value of counter `index`.
    pub fn value(&self, index: usize) -> Result<u64, MetricsError> {
        self.check_index(index)?;
        Ok(self.values[index].load(Ordering::Relaxed))
    }

    /// Returns the used counters ordered by index.
    pub fn snapshot(&self) -> Vec<CounterSample> {
        let names = self.read_names();
        names
            .iter()
            .enumerate()
            .map(|(index, name)| CounterSample {
                index,
                name: Arc::clone(name),
                value: self.values[index].load(Ordering::Relaxed),
            })
            .collect()
    }

    fn check_index(&self, index: usize) -> Result<(), MetricsError> {
        if index >= self.capacity() {
            return Err(MetricsError::IndexOutOfRange {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn ensure_used(&self, n: usize) {
        if self.read_names().len() >= n {
            return;
        }
        grow_to(&mut self.write_names(), n);
    }

    fn read_names(&self) -> RwLockReadGuard<'_, Vec<Arc<str>>> {
        self.names.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_names(&self) -> RwLockWriteGuard<'_, Vec<Arc<str>>> {
        self.names.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn grow_to(names: &mut Vec<Arc<str>>, n: usize) {
    while names.len() < n {
        let i = names.len();
        names.push(Arc::from(format!("Counter {i}")));
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("capacity", &self.capacity())
            .field("used_counter", &self.used_counter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_keeps_value() {
        let m = MetricsRegistry::new(4);
        m.inc_counter(2).unwrap();
        m.define_counter(2, "X").unwrap();
        m.inc_counter(2).unwrap();
        m.define_counter(2, "Y").unwrap();

        let snap = m.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[2].name.as_ref(), "Y");
        assert_eq!(snap[2].value, 2);
    }

    #[test]
    fn define_then_two_increments() {
        let m = MetricsRegistry::new(8);
        m.define_counter(0, "X").unwrap();
        m.inc_counter(0).unwrap();
        assert_eq!(m.inc_counter(0).unwrap(), 2);

        let snap = m.snapshot();
        assert!(snap.iter().any(|s| s.name.as_ref() == "X" && s.value == 2));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let m = MetricsRegistry::new(2);
        assert_eq!(
            m.define_counter(2, "nope"),
            Err(MetricsError::IndexOutOfRange { index: 2, capacity: 2 })
        );
        assert!(matches!(
            m.inc_counter(5),
            Err(MetricsError::IndexOutOfRange { index: 5, .. })
        ));
        assert!(m.set_counter(9, 1).is_err());
        assert_eq!(m.used_counter(), 0);
    }

    #[test]
    fn used_counter_never_shrinks() {
        let m = MetricsRegistry::new(16);
        m.set_used(5).unwrap();
        m.set_used(2).unwrap();
        assert_eq!(m.used_counter(), 5);
        assert_eq!(
            m.set_used(17),
            Err(MetricsError::CapacityExceeded { requested: 17, capacity: 16 })
        );
        let names: Vec<_> = m.snapshot().into_iter().map(|s| s.name.to_string()).collect();
        assert_eq!(names, ["Counter 0", "Counter 1", "Counter 2", "Counter 3", "Counter 4"]);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let m = MetricsRegistry::new(0);
        assert!(m.inc_counter(0).is_err());
        assert!(m.snapshot().is_empty());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let m = Arc::new(MetricsRegistry::new(4));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.inc_counter(3).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(m.value(3).unwrap(), 8000);
    }
}
