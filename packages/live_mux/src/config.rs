use serde::{Deserialize, Serialize};

/// Client tunables (lives under `[live]` in the operator config file).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Maximum number of inbound frames retained in the shared history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backoff tunables (lives under `[live.reconnect]`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_history_limit() -> usize {
    100
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = LiveConfig::default();
        assert_eq!(c.history_limit, 100);
        assert_eq!(c.reconnect.base_delay_ms, 1000);
        assert_eq!(c.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: LiveConfig = serde_json::from_str(r#"{"reconnect":{"max_delay_ms":5000}}"#).unwrap();
        assert_eq!(c.history_limit, 100);
        assert_eq!(c.reconnect.base_delay_ms, 1000);
        assert_eq!(c.reconnect.max_delay_ms, 5000);
    }
}
