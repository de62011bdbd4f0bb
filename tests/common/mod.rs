#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use payloadvisor::{
    AppConfig, Event, EventKind, ExecutionContext, HandlerFn, HandlerRef, SequenceError, Subscribe,
};
use tokio::sync::broadcast;

/// Config without OS signal handling, so tests control shutdown.
pub fn quiet_config() -> AppConfig {
    AppConfig {
        handle_os_signals: false,
        grace: Duration::from_secs(2),
        ..AppConfig::default()
    }
}

pub fn noop() -> HandlerRef {
    HandlerFn::arc(|_ctx: ExecutionContext| async { Ok::<_, SequenceError>(()) })
}

/// Waits for the first event of `kind` (optionally for `sequence`), up to `timeout_ms`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
    sequence: Option<&str>,
    timeout_ms: u64,
) -> Option<Event> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let ev = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(ev)) => ev,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        };
        if ev.kind == kind && sequence.map_or(true, |s| ev.sequence.as_deref() == Some(s)) {
            return Some(ev);
        }
    }
}

/// Subscriber that records every event kind it sees.
#[derive(Default)]
pub struct Recorder {
    kinds: Mutex<Vec<EventKind>>,
}

impl Recorder {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.kinds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.kinds.lock().unwrap().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}
