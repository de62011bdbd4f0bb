//! Sequences: named handlers, their registry, requests and per-invocation context.
//!
//! ```text
//! InvocationRequest{name, params, id} ──► SequenceRegistry.entry(name) ──► SequenceHandler::execute(ExecutionContext)
//! ```

mod context;
mod handler;
mod registry;
mod request;

pub use context::ExecutionContext;
pub use handler::{HandlerFn, HandlerRef, SequenceHandler, SequenceOutput};
pub use registry::SequenceRegistry;
pub(crate) use registry::SequenceEntry;
pub use request::{InvocationRequest, RequestId};
