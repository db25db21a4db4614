/*!
common/src/lib.rs

Shared configuration types and helpers for teledigest.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an optional override file
- Resolution of the optional sections into concrete settings (pacing, source, display zone)
- The channel list loader
*/

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://t.me";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";
/// Moscow time, UTC+3 all year round.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 180;

/// Source platform (web preview) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Origin serving both the listing pages (`/s/<channel>`) and single posts (`/<post>?single`)
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub fetch_timeout_seconds: Option<u64>,
}

/// Politeness delays between outbound calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacingConfig {
    pub fallback_delay_ms: Option<u64>,
    pub channel_delay_ms: Option<u64>,
    pub batch_delay_seconds: Option<u64>,
}

/// Digest run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Newline-delimited channel list (`#` comments allowed)
    pub channels_path: Option<String>,
    /// Number of chunks the corpus is split into before summarization
    pub chunk_count: Option<usize>,
    /// Offset of the display/cutoff timezone, in minutes east of UTC
    pub utc_offset_minutes: Option<i32>,
    /// chrono strftime pattern for `formatted_timestamp`
    pub timestamp_format: Option<String>,
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    /// Models accepted by `POST /api/generate`
    pub supported_models: Option<Vec<String>>,
}

/// Image proxy limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageProxyConfig {
    pub timeout_ms: Option<u64>,
    pub max_size_bytes: Option<u64>,
    /// Lower-case host names; empty means any host is accepted
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// HTTP server binding
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub source: Option<SourceConfig>,
    pub pacing: Option<PacingConfig>,
    pub digest: Option<DigestConfig>,
    pub llm: Option<RemoteLlmConfig>,
    pub image_proxy: Option<ImageProxyConfig>,
    pub server: Option<ServerConfig>,
}

/// Delays inserted between sequential outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Before each single-post fallback fetch
    pub fallback_delay: Duration,
    /// Between two channel listing fetches
    pub channel_delay: Duration,
    /// Between two summarization calls
    pub batch_delay: Duration,
}

impl Pacing {
    /// No delays at all (tests, local fixtures).
    pub fn none() -> Self {
        Self {
            fallback_delay: Duration::ZERO,
            channel_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
        }
    }
}

/// Resolved `[source]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub base_url: String,
    pub user_agent: String,
    pub fetch_timeout: Duration,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn pacing(&self) -> Pacing {
        let p = self.pacing.clone().unwrap_or_default();
        Pacing {
            fallback_delay: Duration::from_millis(p.fallback_delay_ms.unwrap_or(500)),
            channel_delay: Duration::from_millis(p.channel_delay_ms.unwrap_or(1000)),
            batch_delay: Duration::from_secs(p.batch_delay_seconds.unwrap_or(65)),
        }
    }

    pub fn source(&self) -> SourceSettings {
        let s = self.source.clone().unwrap_or_default();
        SourceSettings {
            base_url: s
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            user_agent: s.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            fetch_timeout: Duration::from_secs(s.fetch_timeout_seconds.unwrap_or(15)),
        }
    }

    pub fn channels_path(&self) -> String {
        self.digest
            .as_ref()
            .and_then(|d| d.channels_path.clone())
            .unwrap_or_else(|| "channels.txt".to_string())
    }

    /// Chunk count for the batch stage, never below one.
    pub fn chunk_count(&self) -> usize {
        self.digest
            .as_ref()
            .and_then(|d| d.chunk_count)
            .unwrap_or(1)
            .max(1)
    }

    /// Fixed offset used both for the day cutoff and for formatted timestamps.
    pub fn display_offset(&self) -> Result<FixedOffset> {
        let minutes = self
            .digest
            .as_ref()
            .and_then(|d| d.utc_offset_minutes)
            .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
        FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| anyhow!("utc_offset_minutes out of range: {}", minutes))
    }

    pub fn timestamp_format(&self) -> String {
        self.digest
            .as_ref()
            .and_then(|d| d.timestamp_format.clone())
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Parse a newline-delimited channel list. Blank lines and `#` comments are ignored,
/// surrounding whitespace is trimmed, order is preserved.
pub fn parse_channel_list(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read the channel list file. A missing file or a list without any channel is an error.
pub async fn load_channel_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read channel list: {}", path.display()))?;
    let channels = parse_channel_list(&data);
    if channels.is_empty() {
        return Err(anyhow!("channel list {} is empty", path.display()));
    }
    Ok(channels)
}

/// Sleep for `duration`; a zero duration returns immediately.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
