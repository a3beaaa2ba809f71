// Request sharing
//
// Deduplicates concurrent sends of the same cache key within one context.
// - First caller (leader): dispatches to the transport, publishes the result
// - Later callers (followers): wait on the leader's channel and receive the
//   same result, success or failure
// - The in-flight entry is removed the moment the leader settles, so the next
//   send starts fresh

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::constants::TIER_KEY_SEPARATOR;
use crate::error::EngineError;
use crate::transport::{AbortController, TransportResponse};

type SharedResult = Option<Result<TransportResponse, EngineError>>;

struct InFlight {
    id: u64,
    receiver: watch::Receiver<SharedResult>,
    abort: AbortController,
}

/// Table of in-flight transport calls keyed by context id and cache key
#[derive(Clone, Default)]
pub struct RequestSharing {
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl RequestSharing {
    pub fn new() -> Self {
        Self::default()
    }

    fn sharing_key(context_id: &str, key: &str) -> String {
        format!("{}{}{}", context_id, TIER_KEY_SEPARATOR, key)
    }

    /// Join an in-flight call or become its leader
    ///
    /// An entry whose leader was aborted is not joinable; the caller replaces
    /// it and leads a fresh dispatch.
    pub fn acquire(&self, context_id: &str, key: &str, abort: AbortController) -> SharingSlot {
        let sharing_key = Self::sharing_key(context_id, key);
        let mut in_flight = self.in_flight.lock();

        if let Some(entry) = in_flight.get(&sharing_key) {
            if !entry.abort.is_aborted() {
                debug!(key = %sharing_key, "Joining in-flight request");
                return SharingSlot::Follower(SharedResponse {
                    receiver: entry.receiver.clone(),
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        in_flight.insert(
            sharing_key.clone(),
            InFlight {
                id,
                receiver,
                abort,
            },
        );

        SharingSlot::Leader(LeaderGuard {
            key: sharing_key,
            id,
            sharing: self.clone(),
            sender,
            completed: false,
        })
    }

    /// Number of in-flight shared calls
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn remove_in_flight(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock();
        // A replacement leader may already own the key
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key);
        }
    }
}

/// Result of acquiring a sharing slot
pub enum SharingSlot {
    /// First caller for the key, must dispatch and `complete`
    Leader(LeaderGuard),
    /// Another call is in flight, await its result
    Follower(SharedResponse),
}

impl SharingSlot {
    pub fn is_leader(&self) -> bool {
        matches!(self, SharingSlot::Leader(_))
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, SharingSlot::Follower(_))
    }
}

/// Pending result of a shared call
pub struct SharedResponse {
    receiver: watch::Receiver<SharedResult>,
}

impl SharedResponse {
    pub async fn wait(mut self) -> Result<TransportResponse, EngineError> {
        match self.receiver.wait_for(|result| result.is_some()).await {
            Ok(result) => result.clone().unwrap_or(Err(EngineError::Aborted)),
            // Leader vanished without publishing
            Err(_) => Err(EngineError::Aborted),
        }
    }
}

/// Guard held by the leader
///
/// Dropping the guard without `complete` (leader cancelled) settles every
/// follower with `EngineError::Aborted`.
pub struct LeaderGuard {
    key: String,
    id: u64,
    sharing: RequestSharing,
    sender: watch::Sender<SharedResult>,
    completed: bool,
}

impl LeaderGuard {
    /// Publish the result to all followers and release the key
    pub fn complete(mut self, result: Result<TransportResponse, EngineError>) {
        self.sender.send_replace(Some(result));
        self.sharing.remove_in_flight(&self.key, self.id);
        self.completed = true;
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.sender.send_replace(Some(Err(EngineError::Aborted)));
            self.sharing.remove_in_flight(&self.key, self.id);
        }
    }
}
