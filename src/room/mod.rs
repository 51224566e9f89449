#![forbid(unsafe_code)]

// Room module - Room store and lifecycle controller
pub mod system;
pub mod types;

use crate::chat::ChatMessage;
use crate::lobby::LobbyBroadcaster;
use crate::metrics::{Gauges, ServerMetrics};
use crate::registry::ConnectionRegistry;
use crate::signaling::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use system::SystemRoomConfig;
use tokio::sync::RwLock as TokioRwLock;
use tracing::{debug, info, warn};
use types::{
    DestroyReason, DisconnectReport, LeaveOutcome, Lifecycle, RoomError, RoomResult, RoomSnapshot,
    RoomStatus, SYSTEM_SENTINEL,
};
use uuid::Uuid;

pub const MAX_ROOM_NAME_LEN: usize = 64;

/// Room state
pub struct Room {
    pub id: String,
    pub name: String,
    pub host_id: String,
    listeners: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub status: RoomStatus,
    pub stream_url: Option<String>,
    is_system: bool,
    /// Creation order, for stable listing
    seq: u64,
    lifecycle: Lifecycle,
}

impl Room {
    fn new(seq: u64, id: String, name: String, host_id: String) -> Self {
        Self {
            id,
            name,
            host_id,
            listeners: HashSet::new(),
            created_at: Utc::now(),
            status: RoomStatus::Active,
            stream_url: None,
            is_system: false,
            seq,
            lifecycle: Lifecycle::Live,
        }
    }

    fn new_system(seq: u64, config: &SystemRoomConfig) -> Self {
        let status = if config.has_stream() { RoomStatus::Active } else { RoomStatus::Waiting };
        Self {
            status,
            stream_url: config.stream_url.clone(),
            is_system: true,
            ..Self::new(seq, config.id.clone(), config.name.clone(), SYSTEM_SENTINEL.to_string())
        }
    }

    fn is_live(&self) -> bool {
        self.lifecycle == Lifecycle::Live
    }

    /// True only for the live host of a user room; the sentinel never matches.
    fn is_host(&self, participant_id: &str) -> bool {
        !self.is_system && self.host_id == participant_id
    }

    fn is_member(&self, participant_id: &str) -> bool {
        self.is_host(participant_id) || self.listeners.contains(participant_id)
    }

    /// Host (for user rooms) followed by every listener.
    fn members(&self) -> Vec<String> {
        let host = (!self.is_system).then(|| self.host_id.clone());
        host.into_iter().chain(self.listeners.iter().cloned()).collect()
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            host_id: self.host_id.clone(),
            listener_count: self.listeners.len(),
            created_at: self.created_at,
            status: self.status,
            is_system: self.is_system,
            stream_url: self.stream_url.clone(),
        }
    }
}

/// Manages all rooms and the notifications their transitions produce.
///
/// Uses per-room locking: the outer HashMap is protected by a std::sync::RwLock
/// (held only for brief lookups/inserts, never across await points), while each
/// room is protected by its own tokio::sync::RwLock. Every read-then-write of a
/// room's host or listener set happens under that room's write lock, and a
/// destroyed room is flagged before it leaves the map, so an operation that
/// fetched the room just before removal observes `NotFound`.
pub struct RoomManager {
    rooms: Arc<StdRwLock<HashMap<String, Arc<TokioRwLock<Room>>>>>,
    next_seq: AtomicU64,
    registry: ConnectionRegistry,
    lobby: LobbyBroadcaster,
    metrics: ServerMetrics,
}

impl RoomManager {
    /// Creates a room manager seeded with the given system rooms
    pub fn new(
        registry: ConnectionRegistry,
        lobby: LobbyBroadcaster,
        metrics: ServerMetrics,
        system_rooms: Vec<SystemRoomConfig>,
    ) -> Self {
        let manager = Self {
            rooms: Arc::new(StdRwLock::new(HashMap::new())),
            next_seq: AtomicU64::new(1),
            registry,
            lobby,
            metrics,
        };

        {
            let mut rooms = manager.rooms.write().unwrap_or_else(|e| e.into_inner());
            for config in &system_rooms {
                if rooms.contains_key(&config.id) {
                    warn!("Duplicate system room id {}, skipping", config.id);
                    continue;
                }
                let room = Room::new_system(manager.next_seq(), config);
                info!("System room {} ({}) ready", room.id, room.name);
                rooms.insert(config.id.clone(), Arc::new(TokioRwLock::new(room)));
            }
        }

        manager
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Gets a room lock by ID (brief outer read lock, no await)
    fn get_room(&self, room_id: &str) -> RoomResult<Arc<TokioRwLock<Room>>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    fn all_rooms(&self) -> Vec<Arc<TokioRwLock<Room>>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.values().cloned().collect()
    }

    /// Creates a user room hosted by `requester`. Never fails.
    ///
    /// The requester first leaves whatever room it was in.
    pub async fn create_room(&self, requester: &str, name: Option<&str>) -> RoomSnapshot {
        self.detach(requester, None, DestroyReason::HostLeft).await;

        let seq = self.next_seq();
        let name = normalize_name(name, seq);
        let snapshot = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            let mut id = generate_room_id(seq);
            while rooms.contains_key(&id) {
                id = generate_room_id(seq);
            }
            let room = Room::new(seq, id.clone(), name, requester.to_string());
            let snapshot = room.snapshot();
            rooms.insert(id, Arc::new(TokioRwLock::new(room)));
            snapshot
        };

        self.metrics.room_created();
        info!("Room {} ({}) created by {}", snapshot.id, snapshot.name, requester);

        self.republish().await;
        snapshot
    }

    /// Adds `requester` to a room's listener set and tells the host.
    ///
    /// The target is checked before the requester's other memberships are
    /// released, so joining a missing room changes nothing. No room lock is
    /// held across that release; a target destroyed in between still yields
    /// `NotFound` after the old membership is gone.
    ///
    /// # Errors
    /// `RoomError::NotFound` if no live room has that id, including a room
    /// destroyed while this join was in flight
    pub async fn join_room(&self, requester: &str, room_id: &str) -> RoomResult<RoomSnapshot> {
        let room_lock = self.get_room(room_id)?;
        if !room_lock.read().await.is_live() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }
        self.detach(requester, Some(room_id), DestroyReason::HostLeft).await;

        let (snapshot, joined) = {
            let mut room = room_lock.write().await;
            if !room.is_live() {
                return Err(RoomError::NotFound(room_id.to_string()));
            }

            if room.is_host(requester) {
                debug!("Host {} re-joined own room {}", requester, room_id);
                (room.snapshot(), false)
            } else {
                let joined = room.listeners.insert(requester.to_string());
                if joined && !room.is_system {
                    self.registry.send(&room.host_id, &ServerMessage::UserJoined {
                        user_id: requester.to_string(),
                    });
                }
                (room.snapshot(), joined)
            }
        };

        if joined {
            self.metrics.listener_joined();
            info!("Participant {} joined room {} ({} listeners)", requester, room_id, snapshot.listener_count);
        }

        self.republish().await;
        Ok(snapshot)
    }

    /// Leaves a room: a host destroys it, a listener is removed.
    pub async fn leave_room(&self, requester: &str, room_id: &str) -> LeaveOutcome {
        let outcome = match self.get_room(room_id) {
            Ok(room_lock) => {
                let mut room = room_lock.write().await;
                if room.is_live() {
                    self.leave_locked(&mut room, requester, DestroyReason::HostLeft)
                } else {
                    LeaveOutcome::NotFound
                }
            }
            Err(_) => LeaveOutcome::NotFound,
        };
        self.metrics.leave(outcome);

        debug!("Participant {} leave room {}: {:?}", requester, room_id, outcome);
        self.republish().await;
        outcome
    }

    /// Removes a departed participant from every room it is tied to.
    ///
    /// Idempotent: a second call for the same participant finds nothing,
    /// sends nothing and returns an empty report.
    pub async fn on_disconnect(&self, requester: &str) -> DisconnectReport {
        self.lobby.unsubscribe(requester);

        let report = self.detach(requester, None, DestroyReason::HostDisconnected).await;
        if !report.is_empty() {
            info!("Participant {} disconnected, cleaned up {} room(s)", requester, report.rooms.len());
            self.republish().await;
        }
        report
    }

    /// Subscribes to room-list updates and republishes to every subscriber.
    pub async fn join_lobby(&self, participant_id: &str) {
        if self.lobby.subscribe(participant_id) {
            debug!("Participant {} subscribed to lobby", participant_id);
        }
        self.republish().await;
    }

    /// Every live room, system rooms included, in creation order
    pub async fn list_rooms(&self) -> Vec<RoomSnapshot> {
        let mut listed: Vec<(u64, RoomSnapshot)> = Vec::new();
        for room_lock in self.all_rooms() {
            let room = room_lock.read().await;
            if room.is_live() {
                listed.push((room.seq, room.snapshot()));
            }
        }
        listed.sort_by_key(|(seq, _)| *seq);
        listed.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Current snapshot of one room
    #[cfg(test)]
    pub async fn room_snapshot(&self, room_id: &str) -> RoomResult<RoomSnapshot> {
        let room_lock = self.get_room(room_id)?;
        let room = room_lock.read().await;
        if !room.is_live() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }
        Ok(room.snapshot())
    }

    /// Host (user rooms only) plus listeners of a room
    ///
    /// # Errors
    /// `RoomError::NotFound` if the room does not exist
    pub async fn room_members(&self, room_id: &str) -> RoomResult<Vec<String>> {
        let room_lock = self.get_room(room_id)?;
        let room = room_lock.read().await;
        if !room.is_live() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }
        Ok(room.members())
    }

    /// Live host of a room; `None` for system rooms
    ///
    /// # Errors
    /// `RoomError::NotFound` if the room does not exist
    pub async fn host_of(&self, room_id: &str) -> RoomResult<Option<String>> {
        let room_lock = self.get_room(room_id)?;
        let room = room_lock.read().await;
        if !room.is_live() {
            return Err(RoomError::NotFound(room_id.to_string()));
        }
        Ok((!room.is_system).then(|| room.host_id.clone()))
    }

    /// Whether `host_id` hosts a room in which `listener_id` is listening
    pub async fn is_host_of_listener(&self, host_id: &str, listener_id: &str) -> bool {
        for room_lock in self.all_rooms() {
            let room = room_lock.read().await;
            if room.is_live() && room.is_host(host_id) && room.listeners.contains(listener_id) {
                return true;
            }
        }
        false
    }

    /// Destroys every user room, notifying all members including the host.
    pub async fn shutdown(&self) {
        info!("Shutting down all rooms...");
        let mut destroyed = 0;
        for room_lock in self.all_rooms() {
            let mut room = room_lock.write().await;
            if room.is_live() && !room.is_system {
                self.destroy_locked(&mut room, DestroyReason::Shutdown);
                destroyed += 1;
            }
        }
        info!("All rooms shut down ({} destroyed)", destroyed);
    }

    /// Live counts for `/health` and `/metrics`
    pub async fn gauges(&self) -> Gauges {
        let mut gauges = Gauges {
            connections: self.registry.connection_count(),
            lobby_subscribers: self.lobby.subscriber_count(),
            ..Gauges::default()
        };
        for room_lock in self.all_rooms() {
            let room = room_lock.read().await;
            if !room.is_live() {
                continue;
            }
            if room.is_system {
                gauges.system_rooms += 1;
            } else {
                gauges.user_rooms += 1;
            }
            gauges.listeners += room.listeners.len();
        }
        gauges
    }

    /// Applies leave semantics to every room the requester belongs to, except
    /// `keep`. Does not republish.
    async fn detach(&self, requester: &str, keep: Option<&str>, reason: DestroyReason) -> DisconnectReport {
        let mut report = DisconnectReport::default();
        for room_lock in self.all_rooms() {
            let mut room = room_lock.write().await;
            if !room.is_live() || keep == Some(room.id.as_str()) || !room.is_member(requester) {
                continue;
            }
            let outcome = self.leave_locked(&mut room, requester, reason);
            self.metrics.leave(outcome);
            report.rooms.push((room.id.clone(), outcome));
        }
        report
    }

    /// Leave transition for one live room. Caller holds the room's write lock.
    fn leave_locked(&self, room: &mut Room, requester: &str, reason: DestroyReason) -> LeaveOutcome {
        if room.is_host(requester) {
            self.destroy_locked(room, reason);
            return LeaveOutcome::Destroyed;
        }

        if !room.listeners.remove(requester) {
            return LeaveOutcome::NotMember;
        }

        info!("Participant {} left room {}", requester, room.id);
        self.registry.send_many(&room.members(), &ServerMessage::UserLeft {
            user_id: requester.to_string(),
        });
        LeaveOutcome::Left
    }

    /// `Live -> Destroyed`. Notice, state change and map removal all happen
    /// while the caller holds the room's write lock.
    fn destroy_locked(&self, room: &mut Room, reason: DestroyReason) {
        let mut notified: Vec<String> = room.listeners.drain().collect();
        if reason == DestroyReason::Shutdown {
            notified.push(room.host_id.clone());
        }

        self.registry
            .send_many(&notified, &ServerMessage::NewMessage(ChatMessage::system(reason.notice())));
        self.registry.send_many(&notified, &ServerMessage::RoomClosed { room_id: room.id.clone() });

        room.lifecycle = Lifecycle::Destroyed;
        {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            rooms.remove(&room.id);
        }

        self.metrics.room_destroyed(reason);
        info!("Room {} destroyed ({:?}), {} member(s) notified", room.id, reason, notified.len());
    }

    /// Publishes a fresh room list to the lobby. Callers must not hold any
    /// room lock.
    async fn republish(&self) {
        let _gate = self.lobby.gate().await;
        let rooms = self.list_rooms().await;
        self.lobby.publish(rooms);
    }
}

fn generate_room_id(seq: u64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{seq}-{}", &suffix[..8])
}

fn normalize_name(name: Option<&str>, seq: u64) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.chars().take(MAX_ROOM_NAME_LEN).collect(),
        None => format!("Room #{seq}"),
    }
}
