#![forbid(unsafe_code)]

// Always-on broadcast rooms backed by an external stream

use serde::{Deserialize, Serialize};

/// A permanent room with no live host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRoomConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stream_url: Option<String>,
}

impl SystemRoomConfig {
    pub fn new(id: &str, name: &str, stream_url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            stream_url: Some(stream_url.to_string()),
        }
    }

    /// Built-in rooms used when `SYSTEM_ROOMS` is not set.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "system-lofi",
                "Lo-Fi Radio (24/7)",
                "https://streams.ilovemusic.de/iloveradio17.mp3",
            ),
            Self::new(
                "system-synthwave",
                "Synthwave FM",
                "https://stream.nightride.fm/nightride.m4a",
            ),
        ]
    }

    /// Parses a JSON array of `{id, name, streamUrl}` objects.
    pub fn parse_list(raw: &str) -> serde_json::Result<Vec<Self>> {
        serde_json::from_str(raw)
    }

    /// A room without a stream has nothing to play yet.
    pub fn has_stream(&self) -> bool {
        self.stream_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}
