// End-to-end signaling flows over a real WebSocket

use futures_util::{SinkExt, StreamExt};
use onair::config::ServerConfig;
use onair::metrics::ServerMetrics;
use onair::room::system::SystemRoomConfig;
use onair::room::types::{RoomStatus, SYSTEM_SENTINEL};
use onair::signaling::protocol::{ServerMessage, SignalKind};
use onair::signaling::SignalingServer;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

async fn start_server() -> SocketAddr {
    let config = ServerConfig {
        system_rooms: vec![SystemRoomConfig::new("radio", "Radio", "https://example.com/radio.mp3")],
        ..ServerConfig::default()
    };
    let server = SignalingServer::new(&config, ServerMetrics::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_on(listener));
    addr
}

struct Client {
    id: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let mut client = Self { id: String::new(), ws };
        match client.next().await {
            ServerMessage::Connected { user_id, ice_servers } => {
                assert!(!ice_servers.is_empty());
                client.id = user_id;
            }
            other => panic!("expected connected, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
    }

    async fn send_raw(&mut self, frame: &str) {
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
    }

    async fn next(&mut self) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Skips frames until one matches.
    async fn expect<F>(&mut self, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let msg = self.next().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Collects every frame that arrives within `window`.
    async fn collect_for(&mut self, window: Duration) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(Ok(frame))) = tokio::time::timeout_at(deadline, self.ws.next()).await {
            if let Message::Text(text) = frame {
                out.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        out
    }

    async fn create_room(&mut self, name: &str) -> onair::room::types::RoomSnapshot {
        self.send(json!({"event": "create-room", "data": {"name": name, "requestId": 1}})).await;
        match self.expect(|m| matches!(m, ServerMessage::RoomCreated { .. })).await {
            ServerMessage::RoomCreated { request_id, room } => {
                assert_eq!(request_id, Some(1));
                room
            }
            _ => unreachable!(),
        }
    }

    async fn join_room(&mut self, room_id: &str) -> ServerMessage {
        self.send(json!({"event": "join-room", "data": {"roomId": room_id, "requestId": 2}})).await;
        self.expect(|m| matches!(m, ServerMessage::JoinRoomResult { .. })).await
    }

    async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}

#[tokio::test]
async fn test_broadcast_room_lifecycle_end_to_end() {
    let addr = start_server().await;
    let mut lobby = Client::connect(addr).await;
    let mut x = Client::connect(addr).await;
    let mut y = Client::connect(addr).await;

    lobby.send(json!({"event": "join-lobby"})).await;
    match lobby.expect(|m| matches!(m, ServerMessage::RoomList(_))).await {
        ServerMessage::RoomList(rooms) => {
            assert_eq!(rooms.len(), 1);
            assert!(rooms[0].is_system);
            assert_eq!(rooms[0].host_id, SYSTEM_SENTINEL);
        }
        _ => unreachable!(),
    }

    // A: create
    let room = x.create_room("Test").await;
    assert_eq!(room.host_id, x.id);
    assert_eq!(room.listener_count, 0);
    assert_eq!(room.status, RoomStatus::Active);
    lobby
        .expect(|m| matches!(m, ServerMessage::RoomList(rooms) if rooms.iter().any(|r| r.id == room.id)))
        .await;

    // B: join
    match y.join_room(&room.id).await {
        ServerMessage::JoinRoomResult { request_id, success, room: Some(joined), .. } => {
            assert_eq!(request_id, Some(2));
            assert!(success);
            assert_eq!(joined.listener_count, 1);
        }
        other => panic!("unexpected join result: {other:?}"),
    }
    let y_id = y.id.clone();
    x.expect(|m| matches!(m, ServerMessage::UserJoined { user_id } if *user_id == y_id)).await;

    // C: offer relay
    let offer = json!({"type": "offer", "sdp": "v=0\r\ns=-\r\n"});
    x.send(json!({
        "event": "webrtc-signal",
        "data": {"type": "offer", "payload": offer, "targetUserId": y.id}
    }))
    .await;
    match y.expect(|m| matches!(m, ServerMessage::WebrtcSignal { .. })).await {
        ServerMessage::WebrtcSignal { kind, payload, sender_id } => {
            assert_eq!(kind, SignalKind::Offer);
            assert_eq!(payload, offer);
            assert_eq!(sender_id, x.id);
        }
        _ => unreachable!(),
    }

    // E: chat reaches host and sender
    y.send(json!({"event": "send-message", "data": {"roomId": room.id, "text": "hi"}})).await;
    for client in [&mut x, &mut y] {
        match client.expect(|m| matches!(m, ServerMessage::NewMessage(_))).await {
            ServerMessage::NewMessage(chat) => {
                assert_eq!(chat.text, "hi");
                assert_eq!(chat.sender_id, y_id);
                assert!(!chat.is_system);
            }
            _ => unreachable!(),
        }
    }

    // D: host disconnect
    x.close().await;
    match y.expect(|m| matches!(m, ServerMessage::NewMessage(_))).await {
        ServerMessage::NewMessage(notice) => {
            assert!(notice.is_system);
            assert_eq!(notice.sender_id, SYSTEM_SENTINEL);
            assert!(notice.text.contains("Signal lost"));
        }
        _ => unreachable!(),
    }
    let room_id = room.id.clone();
    y.expect(|m| matches!(m, ServerMessage::RoomClosed { room_id: closed } if *closed == room_id)).await;
    let notices = y
        .collect_for(Duration::from_millis(200))
        .await
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::NewMessage(c) if c.is_system))
        .count();
    assert_eq!(notices, 0);

    let mut z = Client::connect(addr).await;
    match z.join_room(&room.id).await {
        ServerMessage::JoinRoomResult { success, room, message, .. } => {
            assert!(!success);
            assert!(room.is_none());
            assert!(message.unwrap().contains("not found"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_late_listener_stream_handshake() {
    let addr = start_server().await;
    let mut host = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;

    let room = host.create_room("Late night").await;
    listener.join_room(&room.id).await;

    listener.send(json!({"event": "check-stream-status", "data": {"roomId": room.id}})).await;
    let listener_id = listener.id.clone();
    host.expect(|m| matches!(m, ServerMessage::CheckStreamStatus { requester_id } if *requester_id == listener_id))
        .await;

    host.send(json!({
        "event": "stream-status-reply",
        "data": {"requesterId": listener.id, "isStreaming": true}
    }))
    .await;
    listener.expect(|m| matches!(m, ServerMessage::HostStartStream)).await;

    // Retry path: the listener asks the host for a fresh offer.
    listener.send(json!({"event": "listener-request-connection", "data": {"roomId": room.id}})).await;
    host.expect(|m| matches!(m, ServerMessage::ListenerRequestConnection { listener_id: id } if *id == listener_id))
        .await;
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send_raw("not json at all").await;
    client.send(json!({"event": "join-room", "data": {}})).await;
    client.send(json!({"event": "webrtc-signal", "data": {"type": "offer"}})).await;
    client.send(json!({"event": "self-destruct"})).await;
    assert!(client.collect_for(Duration::from_millis(200)).await.is_empty());

    // The connection is still fully usable.
    let room = client.create_room("Still here").await;
    assert_eq!(room.host_id, client.id);
}

#[tokio::test]
async fn test_listener_leave_reaches_host() {
    let addr = start_server().await;
    let mut host = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;

    let room = host.create_room("Leaving").await;
    listener.join_room(&room.id).await;
    listener.send(json!({"event": "leave-room", "data": {"roomId": room.id}})).await;

    let listener_id = listener.id.clone();
    host.expect(|m| matches!(m, ServerMessage::UserLeft { user_id } if *user_id == listener_id)).await;
}

#[tokio::test(start_paused = true)]
async fn test_quiet_host_keeps_room_open() {
    let addr = start_server().await;
    let mut host = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;

    let room = host.create_room("Quiet").await;
    listener.join_room(&room.id).await;

    // Peer-to-peer media flows; neither side sends signaling for over five minutes.
    let window = Duration::from_secs(301);
    let (_, heard) = tokio::join!(host.collect_for(window), listener.collect_for(window));
    assert!(
        !heard
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomClosed { .. } | ServerMessage::NewMessage(_))),
        "room closed while its host was still connected: {heard:?}"
    );

    let mut late = Client::connect(addr).await;
    match late.join_room(&room.id).await {
        ServerMessage::JoinRoomResult { success, room: Some(joined), .. } => {
            assert!(success);
            assert_eq!(joined.listener_count, 2);
        }
        other => panic!("room did not survive the quiet period: {other:?}"),
    }
}
