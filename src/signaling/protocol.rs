#![forbid(unsafe_code)]

// Signaling protocol - Message types for WebSocket communication
//
// Every frame is `{"event": "<kebab-case name>", "data": <payload>}`.

use crate::chat::ChatMessage;
use crate::room::types::RoomSnapshot;
use crate::turn::IceServer;
use serde::{Deserialize, Serialize};

/// Negotiation message kind carried by `webrtc-signal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Client-to-Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Subscribe to room-list updates
    JoinLobby,
    /// Create a room hosted by the sender
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        request_id: Option<u64>,
    },
    /// Join a room as a listener
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        request_id: Option<u64>,
    },
    /// Leave a room (destroys it when sent by its host)
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        room_id: String,
    },
    /// Relay an offer/answer/candidate to another participant
    #[serde(rename_all = "camelCase")]
    WebrtcSignal {
        #[serde(rename = "type")]
        kind: SignalKind,
        payload: serde_json::Value,
        target_user_id: String,
    },
    /// Host announces that media is available
    #[serde(rename_all = "camelCase")]
    HostStartStream {
        room_id: String,
    },
    /// Listener asks the host to initiate a connection toward it
    #[serde(rename_all = "camelCase")]
    ListenerRequestConnection {
        room_id: String,
    },
    /// Listener asks the host whether it is already streaming
    #[serde(rename_all = "camelCase")]
    CheckStreamStatus {
        room_id: String,
    },
    /// Host answers a `check-stream-status`
    #[serde(rename_all = "camelCase")]
    StreamStatusReply {
        requester_id: String,
        is_streaming: bool,
    },
    /// Chat text for a room
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: String,
        text: String,
    },
}

/// Server-to-Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection
    #[serde(rename_all = "camelCase")]
    Connected {
        user_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ice_servers: Vec<IceServer>,
    },
    /// Full replacement of the subscriber's room list
    RoomList(Vec<RoomSnapshot>),
    /// Acknowledges `create-room`
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        room: RoomSnapshot,
    },
    /// Acknowledges `join-room`
    #[serde(rename_all = "camelCase")]
    JoinRoomResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<RoomSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A listener joined (host only)
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: String,
    },
    /// A listener left
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: String,
    },
    /// The room the client was in no longer exists
    #[serde(rename_all = "camelCase")]
    RoomClosed {
        room_id: String,
    },
    /// Relayed negotiation message
    #[serde(rename_all = "camelCase")]
    WebrtcSignal {
        #[serde(rename = "type")]
        kind: SignalKind,
        payload: serde_json::Value,
        sender_id: String,
    },
    /// Media is available; request a connection
    HostStartStream,
    /// A listener wants an offer from the host
    #[serde(rename_all = "camelCase")]
    ListenerRequestConnection {
        listener_id: String,
    },
    /// A listener asks whether the host is streaming
    #[serde(rename_all = "camelCase")]
    CheckStreamStatus {
        requester_id: String,
    },
    /// Chat fan-out
    NewMessage(ChatMessage),
    /// Error response
    Error {
        message: String,
    },
}
