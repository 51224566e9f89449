#![forbid(unsafe_code)]

// Lobby broadcaster - pushes the full room list to every lobby subscriber

use crate::registry::ConnectionRegistry;
use crate::room::types::RoomSnapshot;
use crate::signaling::protocol::ServerMessage;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::{Mutex as TokioMutex, MutexGuard};
use tracing::debug;

/// Participants that asked for room-list updates.
///
/// Publishing is gated by an async mutex: callers take the gate, build the
/// snapshot, then publish, so a slower publisher can never overwrite a newer
/// list with an older one.
#[derive(Clone)]
pub struct LobbyBroadcaster {
    subscribers: Arc<StdRwLock<HashSet<String>>>,
    registry: ConnectionRegistry,
    publish_gate: Arc<TokioMutex<()>>,
}

impl LobbyBroadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            subscribers: Arc::new(StdRwLock::new(HashSet::new())),
            registry,
            publish_gate: Arc::new(TokioMutex::new(())),
        }
    }

    /// Adds a subscriber. Re-subscribing is allowed and returns false.
    pub fn subscribe(&self, participant_id: &str) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.insert(participant_id.to_string())
    }

    pub fn unsubscribe(&self, participant_id: &str) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.remove(participant_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Serializes publishers; hold the guard across snapshot + publish.
    pub async fn gate(&self) -> MutexGuard<'_, ()> {
        self.publish_gate.lock().await
    }

    /// Sends `room-list` to every subscriber. Returns how many were reached.
    pub fn publish(&self, rooms: Vec<RoomSnapshot>) -> usize {
        let targets: Vec<String> = {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subs.iter().cloned().collect()
        };
        if targets.is_empty() {
            return 0;
        }

        let room_count = rooms.len();
        let reached = self.registry.send_many(&targets, &ServerMessage::RoomList(rooms));
        debug!("Published {} rooms to {}/{} lobby subscribers", room_count, reached, targets.len());
        reached
    }
}
