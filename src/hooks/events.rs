// Hook lifecycle events

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::error::EngineError;
use crate::method::Method;

/// Settlement of one hook invocation
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub method: Method,
    /// Arguments the invocation was sent with
    pub args: Vec<Value>,
    pub from_cache: bool,
    pub outcome: Result<Value, EngineError>,
}

impl HookEvent {
    pub fn data(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.outcome.as_ref().err()
    }
}

pub type EventHandler = Arc<dyn Fn(&HookEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Success,
    Error,
    Complete,
}

#[derive(Default)]
pub(crate) struct Listeners {
    success: Mutex<Vec<EventHandler>>,
    error: Mutex<Vec<EventHandler>>,
    complete: Mutex<Vec<EventHandler>>,
}

impl Listeners {
    fn list(&self, kind: EventKind) -> &Mutex<Vec<EventHandler>> {
        match kind {
            EventKind::Success => &self.success,
            EventKind::Error => &self.error,
            EventKind::Complete => &self.complete,
        }
    }

    pub fn add(&self, kind: EventKind, handler: EventHandler) {
        self.list(kind).lock().push(handler);
    }

    pub fn emit(&self, kind: EventKind, event: &HookEvent) {
        let handlers = self.list(kind).lock().clone();
        for handler in handlers {
            handler(event);
        }
    }
}
