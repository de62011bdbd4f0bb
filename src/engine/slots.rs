//! Execution slots and in-flight bookkeeping.
//!
//! A slot is the pair of permits an invocation holds while its handler runs:
//! the per-sequence permit (FIFO for serial sequences) and the global one.
//! Both semaphores are fair, so waiters are admitted in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::sequences::RequestId;

/// Permits held for the duration of one handler execution.
pub(super) struct Slot {
    _local: Option<OwnedSemaphorePermit>,
    _global: Option<OwnedSemaphorePermit>,
}

/// Acquires the per-sequence permit, then the global one.
pub(super) async fn acquire(
    local: Option<Arc<Semaphore>>,
    global: Option<Arc<Semaphore>>,
) -> Result<Slot, AcquireError> {
    let local = match local {
        Some(sem) => Some(sem.acquire_owned().await?),
        None => None,
    };
    let global = match global {
        Some(sem) => Some(sem.acquire_owned().await?),
        None => None,
    };
    Ok(Slot {
        _local: local,
        _global: global,
    })
}

struct Tracked {
    name: Arc<str>,
    token: CancellationToken,
    started: bool,
}

/// Requests admitted by the engine and not yet finished.
#[derive(Clone, Default)]
pub(super) struct InFlight {
    inner: Arc<Mutex<HashMap<RequestId, Tracked>>>,
}

impl InFlight {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Tracked>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers `id`; `None` if the id is already in flight.
    pub(super) fn admit(
        &self,
        id: RequestId,
        name: Arc<str>,
        token: CancellationToken,
    ) -> Option<InFlightGuard> {
        let mut map = self.lock();
        if map.contains_key(&id) {
            return None;
        }
        map.insert(
            id,
            Tracked {
                name,
                token,
                started: false,
            },
        );
        Some(InFlightGuard {
            set: self.clone(),
            id,
        })
    }

    /// Cancels the token of `id`. Returns `false` for unknown ids.
    pub(super) fn cancel(&self, id: RequestId) -> bool {
        match self.lock().get(&id) {
            Some(t) => {
                t.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Sorted names of requests whose handler has started and not returned.
    pub(super) fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .values()
            .filter(|t| t.started)
            .map(|t| t.name.to_string())
            .collect();
        names.sort_unstable();
        names
    }

    pub(super) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes the request from the in-flight set when dropped.
pub(super) struct InFlightGuard {
    set: InFlight,
    id: RequestId,
}

impl InFlightGuard {
    pub(super) fn mark_started(&self) {
        if let Some(t) = self.set.lock().get_mut(&self.id) {
            t.started = true;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected_until_released() {
        let set = InFlight::default();
        let id = RequestId::from_raw(7);
        let guard = set.admit(id, "A".into(), CancellationToken::new()).unwrap();
        assert!(set.admit(id, "A".into(), CancellationToken::new()).is_none());
        drop(guard);
        assert_eq!(set.len(), 0);
        assert!(set.admit(id, "A".into(), CancellationToken::new()).is_some());
    }

    #[test]
    fn only_started_requests_are_reported_running() {
        let set = InFlight::default();
        let token = CancellationToken::new();
        let waiting = set.admit(RequestId::from_raw(1), "Waiting".into(), CancellationToken::new());
        let running = set.admit(RequestId::from_raw(2), "Running".into(), token.clone()).unwrap();
        running.mark_started();

        assert_eq!(set.running_names(), vec!["Running"]);
        assert!(set.cancel(RequestId::from_raw(2)));
        assert!(token.is_cancelled());
        assert!(!set.cancel(RequestId::from_raw(3)));
        drop(waiting);
    }

    #[tokio::test]
    async fn slot_holds_both_permits() {
        let local = Arc::new(Semaphore::new(1));
        let global = Arc::new(Semaphore::new(2));
        let slot = acquire(Some(local.clone()), Some(global.clone())).await.unwrap();
        assert_eq!(local.available_permits(), 0);
        assert_eq!(global.available_permits(), 1);
        drop(slot);
        assert_eq!(local.available_permits(), 1);
        assert_eq!(global.available_permits(), 2);
    }
}
