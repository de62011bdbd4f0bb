//! # Sequence registry: name → handler.
//!
//! Populated during setup and read concurrently by the engine afterwards.
//!
//! ## Rules
//! - Names are 1..=[`MAX_SEQUENCE_NAME_LEN`] characters and unique.
//! - A failed registration leaves the registry unchanged (the original handler stays).
//! - Entries are never removed.
//! - Each entry carries its [`SequenceOptions`] and, when the options cap
//!   concurrency, its own fair semaphore (FIFO admission).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;

use crate::config::SequenceOptions;
use crate::error::RegistryError;
use crate::sequences::handler::HandlerRef;
use crate::MAX_SEQUENCE_NAME_LEN;

/// A registered sequence.
pub(crate) struct SequenceEntry {
    pub(crate) name: Arc<str>,
    pub(crate) handler: HandlerRef,
    pub(crate) options: SequenceOptions,
    pub(crate) limiter: Option<Arc<Semaphore>>,
}

/// Thread-safe registry of named sequences.
#[derive(Default)]
pub struct SequenceRegistry {
    entries: RwLock<HashMap<Arc<str>, Arc<SequenceEntry>>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(name: &str) -> Result<(), RegistryError> {
        let len = name.chars().count();
        if len == 0 || len > MAX_SEQUENCE_NAME_LEN {
            return Err(RegistryError::InvalidName {
                name: name.to_string(),
                max: MAX_SEQUENCE_NAME_LEN,
            });
        }
        Ok(())
    }

    /// Registers `handler` under `name` with default options.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::{ExecutionContext, HandlerFn, RegistryError, SequenceError, SequenceRegistry};
    ///
    /// let reg = SequenceRegistry::new();
    /// let h = HandlerFn::arc(|_ctx: ExecutionContext| async { Ok::<_, SequenceError>(()) });
    /// reg.register("HelloWorld", h.clone()).unwrap();
    ///
    /// assert!(matches!(
    ///     reg.register("HelloWorld", h),
    ///     Err(RegistryError::DuplicateName { .. })
    /// ));
    /// assert!(reg.lookup("HelloWorld").is_ok());
    /// ```
    pub fn register(&self, name: &str, handler: HandlerRef) -> Result<(), RegistryError> {
        self.register_with(name, handler, SequenceOptions::default())
    }

    /// Registers `handler` under `name` with per-sequence options.
    pub fn register_with(
        &self,
        name: &str,
        handler: HandlerRef,
        options: SequenceOptions,
    ) -> Result<(), RegistryError> {
        Self::validate(name)?;

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if entries.contains_key(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
            });
        }

        let name: Arc<str> = Arc::from(name);
        let limiter = options
            .max_concurrent
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        entries.insert(
            Arc::clone(&name),
            Arc::new(SequenceEntry {
                name,
                handler,
                options,
                limiter,
            }),
        );
        Ok(())
    }

    /// Returns the handler registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<HandlerRef, RegistryError> {
        self.entry(name).map(|e| Arc::clone(&e.handler))
    }

    /// Returns the options registered with `name`.
    pub fn options(&self, name: &str) -> Result<SequenceOptions, RegistryError> {
        self.entry(name).map(|e| e.options)
    }

    pub(crate) fn entry(&self, name: &str) -> Result<Arc<SequenceEntry>, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(name)
    }

    /// Sorted list of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .map(|k| k.to_string())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SequenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SequenceError;
    use crate::sequences::{ExecutionContext, HandlerFn};

    fn noop() -> HandlerRef {
        HandlerFn::arc(|_ctx: ExecutionContext| async { Ok::<_, SequenceError>(()) })
    }

    #[test]
    fn lookup_returns_registered_handler() {
        let reg = SequenceRegistry::new();
        let h = noop();
        reg.register("TestGPIO", Arc::clone(&h)).unwrap();
        assert!(Arc::ptr_eq(&reg.lookup("TestGPIO").unwrap(), &h));
    }

    #[test]
    fn duplicate_keeps_original() {
        let reg = SequenceRegistry::new();
        let first = noop();
        reg.register("StageFile", Arc::clone(&first)).unwrap();
        assert_eq!(
            reg.register("StageFile", noop()).unwrap_err(),
            RegistryError::DuplicateName {
                name: "StageFile".into()
            }
        );
        assert!(Arc::ptr_eq(&reg.lookup("StageFile").unwrap(), &first));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn name_length_is_bounded() {
        let reg = SequenceRegistry::new();
        assert!(matches!(
            reg.register("", noop()),
            Err(RegistryError::InvalidName { .. })
        ));
        assert!(matches!(
            reg.register("ABCDEFGHIJKLMNOPQ", noop()),
            Err(RegistryError::InvalidName { max: 16, .. })
        ));
        reg.register("ABCDEFGHIJKLMNOP", noop()).unwrap();
        assert!(reg.contains("ABCDEFGHIJKLMNOP"));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let reg = SequenceRegistry::new();
        assert_eq!(
            reg.lookup("Nope").err(),
            Some(RegistryError::NotFound { name: "Nope".into() })
        );
    }

    #[test]
    fn serial_options_create_limiter() {
        let reg = SequenceRegistry::new();
        reg.register_with("PowerControl", noop(), SequenceOptions::serial())
            .unwrap();
        reg.register("HelloWorld", noop()).unwrap();

        let serial = reg.entry("PowerControl").unwrap();
        assert_eq!(serial.limiter.as_ref().map(|s| s.available_permits()), Some(1));
        assert!(reg.entry("HelloWorld").unwrap().limiter.is_none());
        assert_eq!(reg.names(), vec!["HelloWorld", "PowerControl"]);
    }
}
