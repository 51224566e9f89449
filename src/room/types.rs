#![forbid(unsafe_code)]

// Common types and error handling for the room module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host id used by system rooms, and sender id of system chat notices.
pub const SYSTEM_SENTINEL: &str = "SYSTEM";

/// Errors surfaced by room lifecycle operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room not found: {0}")]
    NotFound(String),
}

pub type RoomResult<T> = Result<T, RoomError>;

/// Public room status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Waiting,
}

/// Internal lifecycle of a room record.
///
/// A room only ever moves `Live -> Destroyed`. Lookups that land on a
/// destroyed record (a concurrent operation held the `Arc` before the map
/// removal) must treat it as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Live,
    Destroyed,
}

/// Public view of a room. Never carries the raw listener set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    pub host_id: String,
    pub listener_count: usize,
    pub created_at: DateTime<Utc>,
    pub status: RoomStatus,
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

/// Why a room was destroyed; selects the notice members receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    HostLeft,
    HostDisconnected,
    Shutdown,
}

impl DestroyReason {
    pub fn notice(self) -> &'static str {
        match self {
            DestroyReason::HostLeft => "Host left the room. Signal lost.",
            DestroyReason::HostDisconnected => "Host disconnected. Signal lost.",
            DestroyReason::Shutdown => "Server shutting down. Signal lost.",
        }
    }
}

/// Result of a leave (explicit or disconnect-driven) against one room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The requester hosted the room; it is gone
    Destroyed,
    /// The requester was a listener and has been removed
    Left,
    /// The room exists but the requester is not a member
    NotMember,
    /// No live room with that id
    NotFound,
}

/// Rooms touched by a disconnect, in the order they were processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReport {
    pub rooms: Vec<(String, LeaveOutcome)>,
}

impl DisconnectReport {
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn destroyed(&self) -> impl Iterator<Item = &str> {
        self.rooms
            .iter()
            .filter(|(_, outcome)| *outcome == LeaveOutcome::Destroyed)
            .map(|(id, _)| id.as_str())
    }
}
