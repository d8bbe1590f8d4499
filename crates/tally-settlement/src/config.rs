//! Settlement engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tally_core::Ratio;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// How often each peer's balance is checked.
    pub check_interval: Duration,
    /// Settle once the balance exceeds the credit midpoint by half this ratio.
    /// Stored scaled by 10^8.
    pub settlement_ratio: Ratio,
    /// Treat a `settle()` call that takes longer than this as failed.
    pub settle_timeout: Option<Duration>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(4000),
            settlement_ratio: Ratio::from_scaled(20_000_000),
            settle_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ratio_is_one_fifth() {
        assert_eq!(SettlementConfig::default().settlement_ratio, Ratio::from_f64(0.2).unwrap());
    }

    #[test]
    fn test_json_config() {
        let config: SettlementConfig =
            serde_json::from_str(r#"{"settlement_ratio": 50000000, "settle_timeout": {"secs": 30, "nanos": 0}}"#)
                .unwrap();
        assert_eq!(config.settlement_ratio.to_string(), "0.50000000");
        assert_eq!(config.settle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.check_interval, Duration::from_millis(4000));
    }
}
