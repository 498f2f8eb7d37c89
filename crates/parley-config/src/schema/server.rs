use serde::{Deserialize, Serialize};

/// WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Per-frame ceiling enforced on the transport (valid range: 1024+).
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            max_frame_bytes: 32 * 1024,
        }
    }
}

/// Fragment session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of every session record, counted from START.
    pub ttl_secs: u64,
    /// How often expired records are reclaimed.
    pub reap_interval_secs: u64,
    /// Fragments returned per page when reading a session back.
    pub page_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            reap_interval_secs: 60,
            page_size: 100,
        }
    }
}
