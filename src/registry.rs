#![forbid(unsafe_code)]

// Connection registry - maps participant ids to their live outbound channels

use crate::signaling::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound half of a participant's WebSocket: pre-serialized JSON frames.
pub type ClientSender = mpsc::Sender<Arc<String>>;

/// Process-wide registry of connected participants.
///
/// The inner map is guarded by a std `RwLock` that is only held for lookups
/// and inserts, never across an await point.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<StdRwLock<HashMap<String, ClientSender>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a participant's outbound channel, replacing any previous one.
    pub fn register(&self, participant_id: &str, sender: ClientSender) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(participant_id.to_string(), sender);
    }

    /// Removes a participant. Returns false if it was already gone.
    pub fn unregister(&self, participant_id: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(participant_id).is_some()
    }

    #[cfg(test)]
    pub fn is_connected(&self, participant_id: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(participant_id).is_some_and(|s| !s.is_closed())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Sends a message to one participant. Returns true if it was queued.
    pub fn send(&self, participant_id: &str, message: &ServerMessage) -> bool {
        match encode(message) {
            Some(json) => self.deliver(participant_id, json),
            None => false,
        }
    }

    /// Sends the same message to every listed participant, serializing once.
    /// Returns how many participants had it queued.
    pub fn send_many<'a, I>(&self, participant_ids: I, message: &ServerMessage) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let Some(json) = encode(message) else {
            return 0;
        };
        participant_ids
            .into_iter()
            .filter(|id| self.deliver(id, json.clone()))
            .count()
    }

    fn deliver(&self, participant_id: &str, json: Arc<String>) -> bool {
        let sender = {
            let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match map.get(participant_id) {
                Some(s) => s.clone(),
                None => {
                    debug!("No live connection for participant {}, dropping message", participant_id);
                    return false;
                }
            }
        };

        match sender.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Channel full for participant {}, dropping message", participant_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Channel closed for participant {} (disconnected)", participant_id);
                false
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!("Failed to serialize message: {}", e);
            None
        }
    }
}
