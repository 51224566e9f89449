#![forbid(unsafe_code)]

// Server metrics: counters keyed by room and relay outcomes, rendered in
// Prometheus text format. Gauges are read from live state at scrape time.

use crate::room::types::{DestroyReason, LeaveOutcome};
use crate::signaling::relay::RelayOutcome;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

const DESTROY_REASON_LABELS: [&str; 3] = ["host_left", "host_disconnected", "shutdown"];
const LEAVE_OUTCOME_LABELS: [&str; 4] = ["left", "destroyed", "not_member", "not_found"];
const RELAY_OUTCOME_LABELS: [&str; 2] = ["delivered", "dropped"];

fn destroy_slot(reason: DestroyReason) -> usize {
    match reason {
        DestroyReason::HostLeft => 0,
        DestroyReason::HostDisconnected => 1,
        DestroyReason::Shutdown => 2,
    }
}

fn leave_slot(outcome: LeaveOutcome) -> usize {
    match outcome {
        LeaveOutcome::Left => 0,
        LeaveOutcome::Destroyed => 1,
        LeaveOutcome::NotMember => 2,
        LeaveOutcome::NotFound => 3,
    }
}

fn relay_slot(outcome: RelayOutcome) -> usize {
    match outcome {
        RelayOutcome::Delivered(_) => 0,
        RelayOutcome::Dropped => 1,
    }
}

/// Live state sampled when `/metrics` or `/health` is served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gauges {
    pub connections: usize,
    pub lobby_subscribers: usize,
    pub user_rooms: usize,
    pub system_rooms: usize,
    pub listeners: usize,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    rooms_created: AtomicU64,
    rooms_destroyed: [AtomicU64; 3],
    joins: AtomicU64,
    leaves: [AtomicU64; 4],
    signals: [AtomicU64; 2],
    chat_messages: AtomicU64,
}

/// Cheap to clone; every clone feeds the same counters.
#[derive(Clone, Default)]
pub struct ServerMetrics {
    counters: Arc<Counters>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.counters.connections.fetch_add(1, Relaxed);
    }

    pub fn frame_received(&self) {
        self.counters.frames_received.fetch_add(1, Relaxed);
    }

    /// A frame that was malformed, rate limited or failed validation
    pub fn frame_rejected(&self) {
        self.counters.frames_rejected.fetch_add(1, Relaxed);
    }

    pub fn room_created(&self) {
        self.counters.rooms_created.fetch_add(1, Relaxed);
    }

    pub fn room_destroyed(&self, reason: DestroyReason) {
        self.counters.rooms_destroyed[destroy_slot(reason)].fetch_add(1, Relaxed);
    }

    pub fn listener_joined(&self) {
        self.counters.joins.fetch_add(1, Relaxed);
    }

    pub fn leave(&self, outcome: LeaveOutcome) {
        self.counters.leaves[leave_slot(outcome)].fetch_add(1, Relaxed);
    }

    pub fn relay(&self, outcome: RelayOutcome) {
        self.counters.signals[relay_slot(outcome)].fetch_add(1, Relaxed);
    }

    pub fn chat_delivered(&self) {
        self.counters.chat_messages.fetch_add(1, Relaxed);
    }

    /// Prometheus text exposition of every counter plus the sampled gauges.
    pub fn render_prometheus(&self, gauges: &Gauges) -> String {
        let c = &self.counters;
        let mut out = String::with_capacity(2048);

        scalar(&mut out, "counter", "onair_connections_total", "WebSocket connections accepted", c.connections.load(Relaxed));
        scalar(&mut out, "counter", "onair_frames_received_total", "Text frames received from clients", c.frames_received.load(Relaxed));
        scalar(&mut out, "counter", "onair_frames_rejected_total", "Frames dropped as malformed, rate limited or invalid", c.frames_rejected.load(Relaxed));
        scalar(&mut out, "counter", "onair_rooms_created_total", "User rooms created", c.rooms_created.load(Relaxed));
        labeled(&mut out, "counter", "onair_rooms_destroyed_total", "User rooms destroyed", "reason", &DESTROY_REASON_LABELS, &load_all(&c.rooms_destroyed));
        scalar(&mut out, "counter", "onair_joins_total", "Listeners added to a room", c.joins.load(Relaxed));
        labeled(&mut out, "counter", "onair_leaves_total", "Leave attempts", "outcome", &LEAVE_OUTCOME_LABELS, &load_all(&c.leaves));
        labeled(&mut out, "counter", "onair_signals_total", "Relayed signaling messages", "outcome", &RELAY_OUTCOME_LABELS, &load_all(&c.signals));
        scalar(&mut out, "counter", "onair_chat_messages_total", "Chat messages fanned out", c.chat_messages.load(Relaxed));

        scalar(&mut out, "gauge", "onair_connections_active", "Open WebSocket connections", gauges.connections as u64);
        scalar(&mut out, "gauge", "onair_lobby_subscribers", "Participants watching the room list", gauges.lobby_subscribers as u64);
        labeled(
            &mut out,
            "gauge",
            "onair_rooms_live",
            "Live rooms",
            "kind",
            &["user", "system"],
            &[gauges.user_rooms as u64, gauges.system_rooms as u64],
        );
        scalar(&mut out, "gauge", "onair_listeners_active", "Listeners across all rooms", gauges.listeners as u64);

        out
    }
}

fn load_all<const N: usize>(slots: &[AtomicU64; N]) -> [u64; N] {
    std::array::from_fn(|i| slots[i].load(Relaxed))
}

fn scalar(out: &mut String, kind: &str, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}");
}

fn labeled(out: &mut String, kind: &str, name: &str, help: &str, label: &str, keys: &[&str], values: &[u64]) {
    let _ = writeln!(out, "# HELP {name} {help}\n# TYPE {name} {kind}");
    for (key, value) in keys.iter().zip(values) {
        let _ = writeln!(out, "{name}{{{label}=\"{key}\"}} {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_land_in_their_own_series() {
        let metrics = ServerMetrics::new();
        metrics.room_destroyed(DestroyReason::HostDisconnected);
        metrics.leave(LeaveOutcome::NotFound);
        metrics.leave(LeaveOutcome::NotFound);
        metrics.relay(RelayOutcome::Delivered(3));
        metrics.relay(RelayOutcome::Dropped);

        let out = metrics.render_prometheus(&Gauges::default());
        assert!(out.contains("onair_rooms_destroyed_total{reason=\"host_disconnected\"} 1"));
        assert!(out.contains("onair_rooms_destroyed_total{reason=\"host_left\"} 0"));
        assert!(out.contains("onair_leaves_total{outcome=\"not_found\"} 2"));
        assert!(out.contains("onair_signals_total{outcome=\"delivered\"} 1"));
        assert!(out.contains("onair_signals_total{outcome=\"dropped\"} 1"));
    }

    #[test]
    fn test_gauges_are_rendered_as_given() {
        let gauges = Gauges {
            connections: 5,
            lobby_subscribers: 2,
            user_rooms: 3,
            system_rooms: 1,
            listeners: 7,
        };
        let out = ServerMetrics::new().render_prometheus(&gauges);
        assert!(out.contains("# TYPE onair_rooms_live gauge"));
        assert!(out.contains("onair_rooms_live{kind=\"user\"} 3"));
        assert!(out.contains("onair_rooms_live{kind=\"system\"} 1"));
        assert!(out.contains("onair_lobby_subscribers 2"));
        assert!(out.contains("onair_connections_active 5"));
        assert!(out.contains("onair_listeners_active 7"));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ServerMetrics::new();
        metrics.clone().room_created();
        assert!(metrics.render_prometheus(&Gauges::default()).contains("onair_rooms_created_total 1"));
    }
}
