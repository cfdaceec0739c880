use std::net::SocketAddr;
use std::path::Path;

use live_mux::endpoint::DEFAULT_DEV_PORT;
use live_mux::{EndpointError, LiveConfig, PageOrigin, live_endpoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Unified config (figment-deserialized from defaults / mc.toml / env vars)
// =============================================================================
//
//   mc.toml:     [live.reconnect]
//                max_delay_ms = 10000
//
//   env var:     MC_LIVE__RECONNECT__MAX_DELAY_MS=10000   (double underscore = nesting)

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Origin(#[from] EndpointError),

    #[error("invalid hub bind address {0:?}")]
    BindAddress(String),
}

/// Top-level configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub origin: OriginFileConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
}

/// Where the application is served from (lives under `[origin]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OriginFileConfig {
    #[serde(default = "default_origin_url")]
    pub url: String,
    /// Frontend runs from a dev server; the backend sits on `dev_port`.
    #[serde(default)]
    pub dev: bool,
    #[serde(default = "default_dev_port")]
    pub dev_port: u16,
}

impl Default for OriginFileConfig {
    fn default() -> Self {
        Self {
            url: default_origin_url(),
            dev: false,
            dev_port: default_dev_port(),
        }
    }
}

impl OriginFileConfig {
    pub fn page_origin(&self) -> Result<PageOrigin, ConfigError> {
        Ok(PageOrigin::parse(&self.url)?)
    }

    /// The live socket URL derived from the origin.
    pub fn live_url(&self) -> Result<String, ConfigError> {
        let origin = self.page_origin()?;
        Ok(live_endpoint(&origin, self.dev.then_some(self.dev_port)))
    }

    /// HTTP base of the backend, for the publish route.
    pub fn api_base(&self) -> Result<String, ConfigError> {
        let mut origin = self.page_origin()?;
        if self.dev {
            origin.port = Some(self.dev_port);
        }
        Ok(origin.to_string())
    }
}

/// Development hub knobs (lives under `[hub]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_hub_host")]
    pub host: String,
    #[serde(default = "default_dev_port")]
    pub port: u16,
    /// Outbound frames buffered per connection before it is dropped as slow.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            host: default_hub_host(),
            port: default_dev_port(),
            queue_size: default_queue_size(),
        }
    }
}

impl HubFileConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::BindAddress(raw))
    }
}

fn default_origin_url() -> String {
    format!("http://127.0.0.1:{DEFAULT_DEV_PORT}")
}
fn default_dev_port() -> u16 {
    DEFAULT_DEV_PORT
}
fn default_hub_host() -> String {
    "127.0.0.1".to_string()
}
fn default_queue_size() -> usize {
    256
}

/// Build a figment that layers: defaults → `config_path` → MC_* env vars.
///
/// A missing file is not an error; its layer is simply empty.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("MC_").split("__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.origin.url, "http://127.0.0.1:5055");
        assert!(!fc.origin.dev);
        assert_eq!(fc.live.history_limit, 100);
        assert_eq!(fc.live.reconnect.base_delay_ms, 1_000);
        assert_eq!(fc.live.reconnect.max_delay_ms, 30_000);
        assert_eq!(fc.hub.port, 5055);
        assert_eq!(fc.hub.queue_size, 256);
    }

    #[test]
    fn test_live_url_from_origin() {
        let origin = OriginFileConfig {
            url: "https://mc.example.com".into(),
            ..Default::default()
        };
        assert_eq!(origin.live_url().unwrap(), "wss://mc.example.com/ws/live");
        assert_eq!(origin.api_base().unwrap(), "https://mc.example.com");
    }

    #[test]
    fn test_dev_mode_points_at_backend_port() {
        let origin = OriginFileConfig {
            url: "http://localhost:5173".into(),
            dev: true,
            dev_port: 5055,
        };
        assert_eq!(origin.live_url().unwrap(), "ws://localhost:5055/ws/live");
        assert_eq!(origin.api_base().unwrap(), "http://localhost:5055");
    }

    #[test]
    fn test_bad_origin() {
        let origin = OriginFileConfig {
            url: "gopher://example.com".into(),
            ..Default::default()
        };
        assert!(matches!(
            origin.live_url(),
            Err(ConfigError::Origin(EndpointError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn test_bind_addr() {
        let hub = HubFileConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(hub.bind_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());

        let hub = HubFileConfig {
            host: "not a host".into(),
            ..Default::default()
        };
        assert!(matches!(hub.bind_addr(), Err(ConfigError::BindAddress(_))));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("mc.toml")).extract().unwrap();
        assert_eq!(fc.live, LiveConfig::default());
        assert_eq!(fc.hub.host, "127.0.0.1");
    }

    #[test]
    fn test_load_config_from_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mc.toml");
        std::fs::write(
            &path,
            r#"
[origin]
url = "http://localhost:5173"
dev = true

[live]
history_limit = 25

[live.reconnect]
max_delay_ms = 5000
"#,
        )
        .unwrap();

        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert!(fc.origin.dev);
        assert_eq!(fc.origin.dev_port, 5055);
        assert_eq!(fc.live.history_limit, 25);
        assert_eq!(fc.live.reconnect.base_delay_ms, 1_000);
        assert_eq!(fc.live.reconnect.max_delay_ms, 5_000);
        assert_eq!(fc.hub.queue_size, 256);
    }
}
