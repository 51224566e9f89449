#![forbid(unsafe_code)]

// WebSocket connection handler for individual clients

use super::protocol::{ClientMessage, ServerMessage};
use super::SignalingServer;
use crate::chat::ChatOutcome;
use crate::room::types::RoomError;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded channel capacity per client.
/// At 100 msg/s rate limit, 64 slots = 640ms of burst buffer.
const CHANNEL_CAPACITY: usize = 64;

/// Server Ping cadence. A live client answers with Pong, which resets the
/// idle timer even when it has no signaling to send.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Idle timeout: close the connection if nothing arrives within this duration,
/// Pongs included, so dead sockets cannot hold semaphore permits forever.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Token bucket rate limiter: max tokens (burst capacity).
const RATE_LIMIT_MAX_TOKENS: u64 = 100;
/// Token bucket: refill rate in tokens per second.
const RATE_LIMIT_REFILL_RATE: u64 = 100;
/// Internal: 1 token in microseconds (for integer math).
const TOKEN_US: u64 = 1_000_000;
/// Internal: max tokens in microseconds.
const MAX_TOKENS_US: u64 = RATE_LIMIT_MAX_TOKENS * TOKEN_US;

const MAX_ID_LEN: usize = 128;

/// Token bucket state for one connection
struct RateLimiter {
    tokens_us: u64,
    last_refill: Instant,
    warned: bool,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            tokens_us: MAX_TOKENS_US,
            last_refill: Instant::now(),
            warned: false,
        }
    }

    /// Takes one token. Returns false when the bucket is empty.
    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_us = now.duration_since(self.last_refill).as_micros() as u64;
        self.last_refill = now;
        self.tokens_us = (self.tokens_us + elapsed_us * RATE_LIMIT_REFILL_RATE).min(MAX_TOKENS_US);

        if self.tokens_us >= TOKEN_US {
            self.tokens_us -= TOKEN_US;
            self.warned = false;
            true
        } else {
            false
        }
    }
}

/// Handles a single WebSocket connection
pub async fn handle_connection(socket: WebSocket, server: SignalingServer, _permit: OwnedSemaphorePermit) {
    let participant_id = Uuid::new_v4().to_string();
    info!("New WebSocket connection: {}", participant_id);

    let metrics = server.metrics.clone();
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded channel for sending messages to this client
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(CHANNEL_CAPACITY);
    server.registry.register(&participant_id, tx.clone());

    // Spawn task to send messages to client
    let participant_id_clone = participant_id.clone();
    let send_task = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(PING_INTERVAL);
        keepalive.tick().await; // Skip first immediate tick
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(json) = frame else { break };
                    if ws_sender.send(Message::Text((*json).clone().into())).await.is_err() {
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Send task finished for participant: {}", participant_id_clone);
    });

    server.registry.send(&participant_id, &ServerMessage::Connected {
        user_id: participant_id.clone(),
        ice_servers: server.ice.ice_servers_for(&participant_id),
    });

    let mut limiter = RateLimiter::new();

    loop {
        let msg = match tokio::time::timeout(IDLE_TIMEOUT, ws_receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                warn!("Idle timeout for participant {}", participant_id);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                metrics.frame_received();

                if !limiter.try_acquire() {
                    if !limiter.warned {
                        limiter.warned = true;
                        warn!("Rate limit exceeded for participant {}", participant_id);
                        server.registry.send(&participant_id, &ServerMessage::Error {
                            message: format!("Rate limit exceeded: max {RATE_LIMIT_REFILL_RATE} messages/second"),
                        });
                    }
                    metrics.frame_rejected();
                    continue;
                }

                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Ignoring malformed message from {}: {}", participant_id, e);
                        metrics.frame_rejected();
                        continue;
                    }
                };

                if let Err(e) = handle_client_message(client_msg, &participant_id, &server).await {
                    warn!("Ignoring message from {}: {}", participant_id, e);
                    metrics.frame_rejected();
                }
                if tx.is_closed() {
                    break;
                }
            }
            Message::Close(_) => {
                info!("Client {} closed connection", participant_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Pings are answered by axum; either frame counts as activity
            }
            Message::Binary(_) => {
                warn!("Unexpected binary frame from client {}", participant_id);
            }
        }
    }

    // Disconnect: the only cancellation signal. Stop routing to this participant
    // before the rooms are cleaned up.
    server.registry.unregister(&participant_id);
    let report = server.rooms.on_disconnect(&participant_id).await;
    for room_id in report.destroyed() {
        info!("Room {} closed: host {} disconnected", room_id, participant_id);
    }
    debug!("Disconnect cleanup for {}: {:?}", participant_id, report);

    drop(tx);
    let _ = send_task.await;

    info!("Connection handler finished for participant: {}", participant_id);
}

fn validate_id(field: &str, value: &str) -> anyhow::Result<()> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        anyhow::bail!("Invalid {field}: must be 1-{MAX_ID_LEN} characters");
    }
    Ok(())
}

/// Handle a single client message
async fn handle_client_message(
    message: ClientMessage,
    participant_id: &str,
    server: &SignalingServer,
) -> anyhow::Result<()> {
    match message {
        ClientMessage::JoinLobby => {
            server.rooms.join_lobby(participant_id).await;
        }

        ClientMessage::CreateRoom { name, request_id } => {
            let room = server.rooms.create_room(participant_id, name.as_deref()).await;
            server.registry.send(participant_id, &ServerMessage::RoomCreated { request_id, room });
        }

        ClientMessage::JoinRoom { room_id, request_id } => {
            validate_id("roomId", &room_id)?;
            let reply = match server.rooms.join_room(participant_id, &room_id).await {
                Ok(room) => ServerMessage::JoinRoomResult {
                    request_id,
                    success: true,
                    room: Some(room),
                    message: None,
                },
                Err(e @ RoomError::NotFound(_)) => {
                    debug!("Join by {} failed: {}", participant_id, e);
                    ServerMessage::JoinRoomResult {
                        request_id,
                        success: false,
                        room: None,
                        message: Some(e.to_string()),
                    }
                }
            };
            server.registry.send(participant_id, &reply);
        }

        ClientMessage::LeaveRoom { room_id } => {
            validate_id("roomId", &room_id)?;
            server.rooms.leave_room(participant_id, &room_id).await;
        }

        ClientMessage::WebrtcSignal { kind, payload, target_user_id } => {
            validate_id("targetUserId", &target_user_id)?;
            server.relay.relay_signal(participant_id, kind, payload, &target_user_id);
        }

        ClientMessage::HostStartStream { room_id } => {
            validate_id("roomId", &room_id)?;
            server.relay.host_start_stream(participant_id, &room_id).await;
        }

        ClientMessage::ListenerRequestConnection { room_id } => {
            validate_id("roomId", &room_id)?;
            server.relay.listener_request_connection(participant_id, &room_id).await;
        }

        ClientMessage::CheckStreamStatus { room_id } => {
            validate_id("roomId", &room_id)?;
            server.relay.check_stream_status(participant_id, &room_id).await;
        }

        ClientMessage::StreamStatusReply { requester_id, is_streaming } => {
            validate_id("requesterId", &requester_id)?;
            server
                .relay
                .stream_status_reply(participant_id, &requester_id, is_streaming)
                .await;
        }

        ClientMessage::SendMessage { room_id, text } => {
            validate_id("roomId", &room_id)?;
            match server.chat.send_message(participant_id, &room_id, &text).await {
                Ok(ChatOutcome::Malformed) => anyhow::bail!("Invalid chat message"),
                Ok(_) => {}
                Err(e) => debug!("Chat from {} dropped: {}", participant_id, e),
            }
        }
    }

    Ok(())
}
