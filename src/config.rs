//! YAML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup pointed at the public blog platform.
//!
//! ```yaml
//! server:
//!   bind: "0.0.0.0:3000"
//! harvest:
//!   pacing_ms: 750
//! sources:
//!   - url: "https://blog.naver.com/some_handle"
//!     display_name: "Some Blog"
//! ```

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub harvest: HarvestConfig,
    pub endpoints: Endpoints,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timing and sizing knobs for a harvest session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Delay between consecutive post retrievals.
    pub pacing_ms: u64,
    pub feed_timeout_secs: u64,
    /// Per-request timeout inside the retrieval chain.
    pub request_timeout_secs: u64,
    /// Number of placeholder entries synthesized when the feed is gone.
    pub placeholder_count: usize,
    pub feed_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Buffered progress events before the producer waits on the consumer.
    pub channel_capacity: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 500,
            feed_timeout_secs: 10,
            request_timeout_secs: 15,
            placeholder_count: 10,
            feed_retries: 3,
            retry_base_delay_ms: 1000,
            channel_capacity: 32,
        }
    }
}

impl HarvestConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Base URLs of the platform's desktop, mobile and feed hosts.
///
/// Overridable so tests (and mirrors) can point the pipeline elsewhere.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    pub blog_base: String,
    pub mobile_base: String,
    pub feed_base: String,
    /// Relay that fetches `<relay>/<absolute url>` on our behalf. `None` disables the last chain step.
    pub proxy_relay: Option<String>,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            blog_base: "https://blog.naver.com".to_string(),
            mobile_base: "https://m.blog.naver.com".to_string(),
            feed_base: "https://rss.blog.naver.com".to_string(),
            proxy_relay: Some("https://cors-anywhere.herokuapp.com".to_string()),
        }
    }
}

impl Endpoints {
    pub fn blog(&self) -> &str {
        self.blog_base.trim_end_matches('/')
    }

    pub fn mobile(&self) -> &str {
        self.mobile_base.trim_end_matches('/')
    }

    pub fn feed_url(&self, handle: &str) -> String {
        format!("{}/{}", self.feed_base.trim_end_matches('/'), handle)
    }

    /// Hosts accepted as a source's canonical location.
    pub fn accepts_host(&self, host: &str) -> bool {
        [&self.blog_base, &self.mobile_base]
            .iter()
            .filter_map(|base| url::Url::parse(base).ok())
            .any(|base| base.host_str() == Some(host))
    }
}

/// A source entry as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub feed_url: Option<String>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, HarvestError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load from `path`, or fall back to defaults when no path is given.
    #[instrument(level = "info")]
    pub async fn load(path: Option<&str>) -> Result<Self, HarvestError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).await?;
        let cfg = Self::from_yaml(&text)?;
        info!(sources = cfg.sources.len(), "Loaded configuration");
        Ok(cfg)
    }
}
