//! Peer protocol configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and damping parameters for the peer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// How often the flooder scans the node table.
    pub flood_interval: Duration,
    /// Updates received this many times are no longer forwarded.
    pub counter_threshold: u32,
    /// Heartbeats fire after a uniformly random delay in `[0, max)`.
    pub max_heartbeat_interval: Duration,
    /// A fresh update is forwarded after a uniformly random delay in `[0, max)`.
    pub max_retransmit_delay: Duration,
    /// Check signatures on inbound link-state updates.
    pub verify_link_state: bool,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            flood_interval: Duration::from_millis(200),
            counter_threshold: 3,
            max_heartbeat_interval: Duration::from_secs(20),
            max_retransmit_delay: Duration::from_millis(500),
            verify_link_state: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PeeringConfig = serde_json::from_str(r#"{"counter_threshold": 5}"#).unwrap();
        assert_eq!(config.counter_threshold, 5);
        assert_eq!(config.flood_interval, Duration::from_millis(200));
    }
}
