// Progress handler registry of a descriptor

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Transfer progress reported by a transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub loaded: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(loaded: u64, total: u64) -> Self {
        Self { loaded, total }
    }
}

pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

#[derive(Default)]
pub(crate) struct ProgressHandlers {
    next_id: AtomicU64,
    download: Mutex<Vec<(u64, ProgressHandler)>>,
    upload: Mutex<Vec<(u64, ProgressHandler)>>,
}

impl ProgressHandlers {
    fn list(&self, direction: Direction) -> &Mutex<Vec<(u64, ProgressHandler)>> {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    pub fn add(self: &Arc<Self>, direction: Direction, handler: ProgressHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.list(direction).lock().push((id, handler));
        Subscription {
            handlers: Arc::downgrade(self),
            direction,
            id,
        }
    }

    pub fn emit(&self, direction: Direction, progress: Progress) {
        // Snapshot first so a handler may unsubscribe itself
        let handlers: Vec<ProgressHandler> = self
            .list(direction)
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(progress);
        }
    }

    #[cfg(test)]
    pub fn count(&self, direction: Direction) -> usize {
        self.list(direction).lock().len()
    }

    fn remove(&self, direction: Direction, id: u64) {
        self.list(direction).lock().retain(|(i, _)| *i != id);
    }
}

/// Registration of a progress handler
///
/// Dropping a subscription keeps the handler registered; call `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    handlers: Weak<ProgressHandlers>,
    direction: Direction,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.remove(self.direction, self.id);
        }
    }
}
