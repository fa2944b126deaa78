use crate::error::{Result, SwarmError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-torrent scheduling limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on peers holding at least one piece assignment
    pub max_concurrently_active_peer_connections_per_torrent: usize,
    /// How long an assigned piece may go without a block before the peer times out
    #[serde(with = "duration_secs")]
    pub max_piece_receiving_time: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrently_active_peer_connections_per_torrent: 10,
            max_piece_receiving_time: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    /// Load a config from a JSON file; missing fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrently_active_peer_connections_per_torrent == 0 {
            return Err(SwarmError::Config(
                "max_concurrently_active_peer_connections_per_torrent must be positive".to_string(),
            ));
        }
        if self.max_piece_receiving_time.is_zero() {
            return Err(SwarmError::Config(
                "max_piece_receiving_time must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
