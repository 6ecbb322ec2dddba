use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};
use crate::rate_limit::RateLimitSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file {}: {e}", path.display()),
            })
        })?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file: {e}"),
            })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Connection URL for the shared counter store. Unset means in-memory
    /// counters only (single-instance deployments, tests).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

fn default_redis_timeout_ms() -> u64 {
    100
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssistantConfig {
    #[serde(default = "default_suggestion_ttl_secs")]
    pub suggestion_ttl_secs: u64,
    #[serde(default = "default_briefing_ttl_secs")]
    pub briefing_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default)]
    pub briefing_window: BriefingWindow,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            suggestion_ttl_secs: default_suggestion_ttl_secs(),
            briefing_ttl_secs: default_briefing_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            briefing_window: BriefingWindow::default(),
        }
    }
}

fn default_suggestion_ttl_secs() -> u64 {
    600
}

fn default_briefing_ttl_secs() -> u64 {
    21_600
}

fn default_cache_capacity() -> u64 {
    1024
}

/// Local-time hours during which the morning briefing is served.
/// `start_hour` is inclusive, `end_hour` exclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BriefingWindow {
    #[serde(default = "default_briefing_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_briefing_end_hour")]
    pub end_hour: u32,
}

impl Default for BriefingWindow {
    fn default() -> Self {
        Self {
            start_hour: default_briefing_start_hour(),
            end_hour: default_briefing_end_hour(),
        }
    }
}

fn default_briefing_start_hour() -> u32 {
    6
}

fn default_briefing_end_hour() -> u32 {
    11
}

impl BriefingWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        time.hour() >= self.start_hour && time.hour() < self.end_hour
    }
}
