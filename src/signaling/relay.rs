#![forbid(unsafe_code)]

// Signaling relay - forwards negotiation and stream handshake messages
//
// Payloads are never inspected. A target without a live connection means the
// message is stale, so it is dropped without surfacing an error.

use super::protocol::{ServerMessage, SignalKind};
use crate::metrics::ServerMetrics;
use crate::registry::ConnectionRegistry;
use crate::room::RoomManager;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued for this many participants
    Delivered(usize),
    /// No reachable target
    Dropped,
}

impl RelayOutcome {
    fn from_count(count: usize) -> Self {
        if count == 0 {
            RelayOutcome::Dropped
        } else {
            RelayOutcome::Delivered(count)
        }
    }
}

#[derive(Clone)]
pub struct SignalRelay {
    rooms: Arc<RoomManager>,
    registry: ConnectionRegistry,
    metrics: ServerMetrics,
}

impl SignalRelay {
    pub fn new(rooms: Arc<RoomManager>, registry: ConnectionRegistry, metrics: ServerMetrics) -> Self {
        Self { rooms, registry, metrics }
    }

    fn record(&self, outcome: RelayOutcome) -> RelayOutcome {
        self.metrics.relay(outcome);
        outcome
    }

    /// Forwards an offer/answer/candidate verbatim, stamped with the sender.
    pub fn relay_signal(
        &self,
        sender_id: &str,
        kind: SignalKind,
        payload: serde_json::Value,
        target_id: &str,
    ) -> RelayOutcome {
        let delivered = self.registry.send(target_id, &ServerMessage::WebrtcSignal {
            kind,
            payload,
            sender_id: sender_id.to_string(),
        });
        if !delivered {
            debug!("Dropped {:?} from {} to unreachable {}", kind, sender_id, target_id);
        }
        self.record(RelayOutcome::from_count(usize::from(delivered)))
    }

    /// Tells every other member of the room that media is available.
    pub async fn host_start_stream(&self, sender_id: &str, room_id: &str) -> RelayOutcome {
        let members = match self.rooms.room_members(room_id).await {
            Ok(members) => members,
            Err(e) => {
                debug!("host-start-stream from {} dropped: {}", sender_id, e);
                return self.record(RelayOutcome::Dropped);
            }
        };
        let others: Vec<String> = members.into_iter().filter(|m| m != sender_id).collect();
        let count = self.registry.send_many(&others, &ServerMessage::HostStartStream);
        debug!("Stream start in room {} announced to {} listener(s)", room_id, count);
        self.record(RelayOutcome::from_count(count))
    }

    /// Asks the room's host to initiate a connection toward the listener.
    pub async fn listener_request_connection(&self, listener_id: &str, room_id: &str) -> RelayOutcome {
        match self.rooms.host_of(room_id).await {
            Ok(Some(host_id)) if host_id != listener_id => {
                let sent = self.registry.send(&host_id, &ServerMessage::ListenerRequestConnection {
                    listener_id: listener_id.to_string(),
                });
                self.record(RelayOutcome::from_count(usize::from(sent)))
            }
            Ok(_) => {
                debug!("listener-request-connection for room {} has no live host", room_id);
                self.record(RelayOutcome::Dropped)
            }
            Err(e) => {
                debug!("listener-request-connection from {} dropped: {}", listener_id, e);
                self.record(RelayOutcome::Dropped)
            }
        }
    }

    /// Asks the host whether it is already streaming.
    pub async fn check_stream_status(&self, requester_id: &str, room_id: &str) -> RelayOutcome {
        match self.rooms.host_of(room_id).await {
            Ok(Some(host_id)) if host_id != requester_id => {
                let sent = self.registry.send(&host_id, &ServerMessage::CheckStreamStatus {
                    requester_id: requester_id.to_string(),
                });
                self.record(RelayOutcome::from_count(usize::from(sent)))
            }
            Ok(_) => self.record(RelayOutcome::Dropped),
            Err(e) => {
                debug!("check-stream-status from {} dropped: {}", requester_id, e);
                self.record(RelayOutcome::Dropped)
            }
        }
    }

    /// Host's answer to `check-stream-status`. A streaming host makes the
    /// requester behave as if it had just received `host-start-stream`.
    pub async fn stream_status_reply(
        &self,
        host_id: &str,
        requester_id: &str,
        is_streaming: bool,
    ) -> RelayOutcome {
        if !is_streaming {
            return self.record(RelayOutcome::Dropped);
        }
        if !self.rooms.is_host_of_listener(host_id, requester_id).await {
            debug!("stream-status-reply from {} ignored: {} is not its listener", host_id, requester_id);
            return self.record(RelayOutcome::Dropped);
        }
        let sent = self.registry.send(requester_id, &ServerMessage::HostStartStream);
        self.record(RelayOutcome::from_count(usize::from(sent)))
    }
}
