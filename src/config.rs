use crate::error::{Result, StreamError};
use serde::Deserialize;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reader: ReaderConfig,
    pub parser: ParserConfig,
    pub coalescing: CoalescingConfig,
    pub upstream: UpstreamConfig,
}

/// Timing budgets for the upstream read loop, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub first_chunk_timeout_secs: f64,
    pub inter_chunk_timeout_secs: f64,
    pub max_duration_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Buffered characters without a decodable value before the buffer is salvaged as text
    pub salvage_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoalescingConfig {
    pub enabled: bool,
    pub adaptive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Connection setup budget; the response body is timed by the reader
    pub connect_timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            first_chunk_timeout_secs: 30.0,
            inter_chunk_timeout_secs: 5.0,
            max_duration_secs: 120.0,
        }
    }
}

impl ReaderConfig {
    pub fn new(first_chunk: Duration, inter_chunk: Duration, max_duration: Duration) -> Self {
        Self {
            first_chunk_timeout_secs: first_chunk.as_secs_f64(),
            inter_chunk_timeout_secs: inter_chunk.as_secs_f64(),
            max_duration_secs: max_duration.as_secs_f64(),
        }
    }

    pub fn first_chunk_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.first_chunk_timeout_secs).unwrap_or_default()
    }

    pub fn inter_chunk_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.inter_chunk_timeout_secs).unwrap_or_default()
    }

    pub fn max_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_duration_secs).unwrap_or_default()
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            salvage_threshold: 10_000,
        }
    }
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adaptive: true,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StreamError::ConfigError(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

impl PipelineConfig {
    /// Load configuration from `BLOCK_STREAM_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = PipelineConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| StreamError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let mut config: PipelineConfig = toml::from_str(&contents)
            .map_err(|e| StreamError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        // Allow environment variables to override file config
        if let Ok(api_key) = env::var("BLOCK_STREAM_API_KEY") {
            config.upstream.api_key = api_key;
        }

        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse("BLOCK_STREAM_FIRST_CHUNK_TIMEOUT")? {
            self.reader.first_chunk_timeout_secs = v;
        }
        if let Some(v) = env_parse("BLOCK_STREAM_INTER_CHUNK_TIMEOUT")? {
            self.reader.inter_chunk_timeout_secs = v;
        }
        if let Some(v) = env_parse("BLOCK_STREAM_MAX_DURATION")? {
            self.reader.max_duration_secs = v;
        }
        if let Some(v) = env_parse("BLOCK_STREAM_SALVAGE_THRESHOLD")? {
            self.parser.salvage_threshold = v;
        }
        if let Some(v) = env_parse("BLOCK_STREAM_COALESCE")? {
            self.coalescing.enabled = v;
        }
        if let Some(v) = env_parse("BLOCK_STREAM_ADAPTIVE")? {
            self.coalescing.adaptive = v;
        }
        if let Ok(endpoint) = env::var("BLOCK_STREAM_ENDPOINT") {
            self.upstream.endpoint = endpoint;
        }
        if let Ok(api_key) = env::var("BLOCK_STREAM_API_KEY") {
            self.upstream.api_key = api_key;
        }
        if let Ok(model) = env::var("BLOCK_STREAM_MODEL") {
            self.upstream.model = model;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let budgets = [
            ("first_chunk_timeout_secs", self.reader.first_chunk_timeout_secs),
            ("inter_chunk_timeout_secs", self.reader.inter_chunk_timeout_secs),
            ("max_duration_secs", self.reader.max_duration_secs),
        ];
        for (name, secs) in budgets {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(StreamError::ConfigError(format!(
                    "{} must be a positive number of seconds",
                    name
                )));
            }
        }

        if self.reader.inter_chunk_timeout_secs > self.reader.max_duration_secs {
            return Err(StreamError::ConfigError(
                "inter_chunk_timeout_secs must not exceed max_duration_secs".to_string(),
            ));
        }

        if self.parser.salvage_threshold == 0 {
            return Err(StreamError::ConfigError(
                "salvage_threshold must be greater than 0".to_string(),
            ));
        }

        if self.upstream.endpoint.is_empty() {
            return Err(StreamError::ConfigError("Endpoint is empty".to_string()));
        }

        if self.upstream.model.is_empty() {
            return Err(StreamError::ConfigError("Model is empty".to_string()));
        }

        if self.upstream.connect_timeout_secs == 0 {
            return Err(StreamError::ConfigError(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
