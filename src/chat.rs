#![forbid(unsafe_code)]

// Chat relay - stamps room chat and fans it out to current members

use crate::metrics::ServerMetrics;
use crate::registry::ConnectionRegistry;
use crate::room::types::{RoomError, SYSTEM_SENTINEL};
use crate::room::RoomManager;
use crate::signaling::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const MAX_CHAT_LEN: usize = 4096;

/// One chat line. Never retained after fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_system: bool,
}

impl ChatMessage {
    pub fn from_participant(sender_id: &str, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            text,
            timestamp: Utc::now(),
            is_system: false,
        }
    }

    /// A server-generated notice (not user chat).
    pub fn system(text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: SYSTEM_SENTINEL.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            is_system: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Queued for this many members
    Delivered(usize),
    /// Empty or oversized text
    Malformed,
    /// Sender is neither host nor listener of the room
    NotMember,
}

#[derive(Clone)]
pub struct ChatRelay {
    rooms: Arc<RoomManager>,
    registry: ConnectionRegistry,
    metrics: ServerMetrics,
}

impl ChatRelay {
    pub fn new(rooms: Arc<RoomManager>, registry: ConnectionRegistry, metrics: ServerMetrics) -> Self {
        Self { rooms, registry, metrics }
    }

    /// Fans a chat line out to the host and every listener, sender included.
    ///
    /// # Errors
    /// `RoomError::NotFound` if the room does not exist
    pub async fn send_message(
        &self,
        sender_id: &str,
        room_id: &str,
        text: &str,
    ) -> Result<ChatOutcome, RoomError> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_CHAT_LEN {
            return Ok(ChatOutcome::Malformed);
        }

        let members = self.rooms.room_members(room_id).await?;
        if !members.iter().any(|m| m == sender_id) {
            debug!("Chat from {} dropped: not a member of room {}", sender_id, room_id);
            return Ok(ChatOutcome::NotMember);
        }

        let message = ChatMessage::from_participant(sender_id, text.to_string());
        let delivered = self.registry.send_many(&members, &ServerMessage::NewMessage(message));
        self.metrics.chat_delivered();
        Ok(ChatOutcome::Delivered(delivered))
    }
}
