#![forbid(unsafe_code)]

// On-air rooms library - signaling and room lifecycle for peer-to-peer audio rooms

pub mod chat;
pub mod config;
pub mod lobby;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod signaling;
pub mod turn;
