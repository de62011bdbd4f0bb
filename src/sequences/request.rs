//! # Invocation requests.
//!
//! An [`InvocationRequest`] names a sequence, carries opaque parameters and is
//! identified by a [`RequestId`]. Ids are assigned from a process-wide counter
//! unless the transport supplies its own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one invocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an externally assigned id.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request to run one sequence.
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    sequence_name: Arc<str>,
    params: Arc<[u8]>,
    request_id: RequestId,
    received_at: SystemTime,
}

impl InvocationRequest {
    /// Creates a request with a freshly allocated id.
    ///
    /// # Example
    /// ```
    /// use payloadvisor::InvocationRequest;
    ///
    /// let req = InvocationRequest::new("UARTLoopback", "hello");
    /// assert_eq!(req.sequence_name(), "UARTLoopback");
    /// assert_eq!(req.params(), b"hello");
    /// ```
    pub fn new(sequence_name: impl Into<Arc<str>>, params: impl AsRef<[u8]>) -> Self {
        Self {
            sequence_name: sequence_name.into(),
            params: Arc::from(params.as_ref()),
            request_id: RequestId::next(),
            received_at: SystemTime::now(),
        }
    }

    /// Replaces the id (transport-assigned ids).
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = id;
        self
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub(crate) fn sequence_name_arc(&self) -> Arc<str> {
        Arc::clone(&self.sequence_name)
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = InvocationRequest::new("HelloWorld", "");
        let b = InvocationRequest::new("HelloWorld", "");
        assert!(b.request_id() > a.request_id());
    }

    #[test]
    fn explicit_id_wins() {
        let req = InvocationRequest::new("StageFile", "f.txt").with_request_id(RequestId::from_raw(42));
        assert_eq!(req.request_id().get(), 42);
        assert_eq!(req.request_id().to_string(), "#42");
    }
}
