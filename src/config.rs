#![forbid(unsafe_code)]

// Server configuration, loaded once from environment variables at startup.

use crate::room::system::SystemRoomConfig;
use crate::turn::{IceConfig, TurnConfig, DEFAULT_STUN_URL};
use thiserror::Error;
use tracing::warn;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_TURN_TTL_SECS: u64 = 86_400;
const DEFAULT_STATIC_DIR: &str = "web/dist";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid SYSTEM_ROOMS: {0}")]
    SystemRooms(#[from] serde_json::Error),

    #[error("Invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_connections: usize,
    pub static_dir: String,
    pub metrics_token: Option<String>,
    pub ice: IceConfig,
    pub system_rooms: Vec<SystemRoomConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            metrics_token: None,
            ice: IceConfig {
                stun_urls: vec![DEFAULT_STUN_URL.to_string()],
                turn: None,
            },
            system_rooms: SystemRoomConfig::defaults(),
        }
    }
}

impl ServerConfig {
    /// Reads `PORT`, `MAX_CONNECTIONS`, `STATIC_DIR`, `METRICS_TOKEN`,
    /// `STUN_URLS`, `TURN_URLS`, `TURN_SECRET`, `TURN_TTL` and `SYSTEM_ROOMS`.
    ///
    /// # Errors
    /// Returns an error if `PORT` or `SYSTEM_ROOMS` cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name: "PORT", value: port })?;
        }

        if let Some(max) = lookup("MAX_CONNECTIONS").and_then(|v| v.parse::<usize>().ok()) {
            if max == 0 {
                warn!("MAX_CONNECTIONS=0 would reject all connections, using default {}", DEFAULT_MAX_CONNECTIONS);
            } else {
                config.max_connections = max;
            }
        }

        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = dir;
        }
        config.metrics_token = lookup("METRICS_TOKEN").filter(|t| !t.is_empty());

        if let Some(urls) = lookup("STUN_URLS") {
            config.ice.stun_urls = split_list(&urls);
        }
        config.ice.turn = turn_from_lookup(&lookup);

        if let Some(raw) = lookup("SYSTEM_ROOMS") {
            config.system_rooms = SystemRoomConfig::parse_list(&raw)?;
        }

        Ok(config)
    }
}

/// TURN is enabled only when both `TURN_URLS` and `TURN_SECRET` are set.
fn turn_from_lookup<F>(lookup: &F) -> Option<TurnConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let urls = split_list(&lookup("TURN_URLS")?);
    let secret = lookup("TURN_SECRET")?;
    if urls.is_empty() || secret.is_empty() {
        return None;
    }
    let ttl_secs = lookup("TURN_TTL")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TURN_TTL_SECS);

    Some(TurnConfig { urls, secret, ttl_secs })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.ice.stun_urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert!(config.ice.turn.is_none());
        assert_eq!(config.system_rooms, SystemRoomConfig::defaults());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("MAX_CONNECTIONS", "0"),
            ("STUN_URLS", "stun:a:1, stun:b:2"),
            ("TURN_URLS", "turn:t:3478"),
            ("TURN_SECRET", "k"),
            ("TURN_TTL", "60"),
            ("SYSTEM_ROOMS", "[]"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.ice.stun_urls.len(), 2);
        assert_eq!(config.ice.turn.unwrap().ttl_secs, 60);
        assert!(config.system_rooms.is_empty());
    }

    #[test]
    fn test_turn_needs_secret() {
        let config = ServerConfig::from_lookup(lookup(&[("TURN_URLS", "turn:t:3478")])).unwrap();
        assert!(config.ice.turn.is_none());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])),
            Err(ConfigError::InvalidValue { name: "PORT", .. })
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("SYSTEM_ROOMS", "{")])),
            Err(ConfigError::SystemRooms(_))
        ));
    }
}
