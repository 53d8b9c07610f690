//! Configuration for the relay binaries.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [gateway]
//! shard_index = 0
//! shard_count = 2
//! presence = "online"
//!
//! [receiving]
//! capacity = 256
//! overflow = "latest"
//!
//! [rest]
//! token = "${DISCORD_TOKEN}"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{BufferPolicy, Overflow};
use crate::session::{IdentifyOptions, PresenceStatus, ShardInfo};
use crate::transport::redis::DEFAULT_STREAM_MAX_LEN;
use crate::{DLQ_STREAM_NAME, PAYLOAD_STREAM_NAME};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Buffering of each event bus subscription
    #[serde(default)]
    pub bus: BufferConfig,

    /// Backlog between the payload source and the pipeline
    #[serde(default = "BufferConfig::receiving")]
    pub receiving: BufferConfig,

    #[serde(default)]
    pub rest: RestConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            gateway: GatewayConfig::default(),
            bus: BufferConfig::default(),
            receiving: BufferConfig::receiving(),
            rest: RestConfig::default(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_dlq_stream")]
    pub dlq_stream: String,

    /// Approximate cap on the payload stream length
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            stream: default_stream(),
            dlq_stream: default_dlq_stream(),
            max_len: default_max_len(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_stream() -> String {
    PAYLOAD_STREAM_NAME.to_string()
}

fn default_dlq_stream() -> String {
    DLQ_STREAM_NAME.to_string()
}

fn default_max_len() -> usize {
    DEFAULT_STREAM_MAX_LEN
}

/// Worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Consumer group to read through; defaults to the worker name.
    ///
    /// Every group receives the whole stream, while consumers within one
    /// group split it. A translating worker must see all of its session's
    /// dispatches in order, so each worker needs a group of its own. Share
    /// a group only between successive runs of the same worker.
    #[serde(default)]
    pub consumer_group: Option<String>,

    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending entries idle this long are claimed from dead consumers
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            consumer_group: None,
            block_ms: default_block_ms(),
            batch_size: default_batch_size(),
            claim_idle_ms: default_claim_idle_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn claim_idle(&self) -> Duration {
        Duration::from_millis(self.claim_idle_ms)
    }

    /// The configured consumer group, or `worker_name`.
    pub fn group(&self, worker_name: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| worker_name.to_string())
    }
}

fn default_block_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    10
}

fn default_claim_idle_ms() -> u64 {
    30000
}

/// Identify settings. Both shard fields must be set to shard the session.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub shard_index: Option<u32>,

    #[serde(default)]
    pub shard_count: Option<u32>,

    /// One of "online", "idle", "dnd", "invisible", "offline"
    #[serde(default)]
    pub presence: Option<String>,
}

impl GatewayConfig {
    /// Validated shard, if configured.
    pub fn shard(&self) -> Result<Option<ShardInfo>, ConfigError> {
        match (self.shard_index, self.shard_count) {
            (None, None) => Ok(None),
            (Some(index), Some(count)) => ShardInfo::new(index, count)
                .map(Some)
                .map_err(|e| ConfigError::ValidationError(format!("gateway shard: {}", e))),
            _ => Err(ConfigError::ValidationError(
                "gateway shard_index and shard_count must be set together".to_string(),
            )),
        }
    }

    pub fn presence(&self) -> Result<Option<PresenceStatus>, ConfigError> {
        match &self.presence {
            None => Ok(None),
            Some(name) => PresenceStatus::from_name(name).map(Some).ok_or_else(|| {
                ConfigError::ValidationError(format!("unknown gateway presence '{}'", name))
            }),
        }
    }

    pub fn identify_options(&self) -> Result<IdentifyOptions, ConfigError> {
        let mut options = IdentifyOptions::new();
        options.shard = self.shard()?;
        options.initial_presence = self.presence()?;
        Ok(options)
    }
}

/// Overflow buffer settings. No capacity means unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default)]
    pub capacity: Option<usize>,

    /// One of "drop_oldest", "drop_newest", "latest"
    #[serde(default = "default_overflow")]
    pub overflow: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: default_overflow(),
        }
    }
}

fn default_overflow() -> String {
    "drop_oldest".to_string()
}

impl BufferConfig {
    fn receiving() -> Self {
        Self {
            capacity: Some(crate::strategy::DEFAULT_RECEIVING_CAPACITY),
            overflow: "latest".to_string(),
        }
    }

    pub fn policy(&self) -> Result<BufferPolicy, ConfigError> {
        let overflow = Overflow::from_name(&self.overflow).ok_or_else(|| {
            ConfigError::ValidationError(format!("unknown overflow policy '{}'", self.overflow))
        })?;

        Ok(match self.capacity {
            None => BufferPolicy::unbounded(),
            Some(0) => {
                return Err(ConfigError::ValidationError(
                    "buffer capacity must be at least 1".to_string(),
                ))
            }
            Some(capacity) => BufferPolicy::bounded(capacity, overflow),
        })
    }
}

/// REST resolver configuration. Without a token, no resolver is built.
#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_rest_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            token: None,
            timeout_ms: default_rest_timeout_ms(),
        }
    }
}

impl RestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Token with placeholders treated as unset
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|token| !token.is_empty() && !token.contains("${"))
    }
}

fn default_rest_base_url() -> String {
    crate::resolver::DEFAULT_API_BASE.to_string()
}

fn default_rest_timeout_ms() -> u64 {
    10000
}

impl RelayConfig {
    /// Load configuration from the default path or RELAY_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/relay.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            stream = %config.redis.stream,
            consumer_group = ?config.worker.consumer_group,
            shard = ?config.gateway.shard_index.zip(config.gateway.shard_count),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate TOML text after substituting `${VAR}` placeholders.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: RelayConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.redis.url;
        if url.contains("${") {
            warn!(url = %url, "Redis URL contains unsubstituted environment variable");
        } else if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.redis.stream.is_empty() {
            return Err(ConfigError::ValidationError(
                "Redis payload stream name is empty".to_string(),
            ));
        }

        if self.worker.consumer_group.as_deref() == Some("") {
            return Err(ConfigError::ValidationError(
                "worker consumer_group is empty".to_string(),
            ));
        }

        if self.worker.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "worker batch_size must be at least 1".to_string(),
            ));
        }

        self.gateway.identify_options()?;
        self.bus.policy()?;
        self.receiving.policy()?;

        let base_url = &self.rest.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "REST base URL must start with http:// or https://".to_string(),
            ));
        }

        if self.rest.token.as_deref().is_some_and(|t| t.contains("${")) {
            warn!("REST token contains unsubstituted environment variable, resolver disabled");
        }

        Ok(())
    }
}

fn env_var_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let Some(re) = env_var_pattern() else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("RELAY_TEST_VAR", "substituted_value");
        let input = "url = \"${RELAY_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("RELAY_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${RELAY_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${RELAY_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.redis.stream, "gateway:payloads");
        assert_eq!(config.redis.dlq_stream, "gateway:payloads:dlq");
        assert_eq!(config.worker.consumer_group, None);
        assert_eq!(config.worker.group("worker-a"), "worker-a");
        assert_eq!(config.worker.block(), Duration::from_millis(2000));
        assert_eq!(config.bus.policy().unwrap(), BufferPolicy::unbounded());
        assert_eq!(
            config.receiving.policy().unwrap().overflow(),
            Overflow::Latest
        );
        assert!(config.rest.token().is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = RelayConfig::parse(
            r#"
            [redis]
            url = "rediss://cache.internal:6380"
        "#,
        )
        .unwrap();

        assert_eq!(config.redis.url, "rediss://cache.internal:6380");
        assert_eq!(config.redis.max_len, DEFAULT_STREAM_MAX_LEN);
        assert_eq!(
            config.receiving.policy().unwrap(),
            BufferPolicy::latest(crate::strategy::DEFAULT_RECEIVING_CAPACITY)
        );
    }

    #[test]
    fn test_parse_gateway_and_buffers() {
        let config = RelayConfig::parse(
            r#"
            [gateway]
            shard_index = 1
            shard_count = 4
            presence = "idle"

            [bus]
            capacity = 64
            overflow = "drop_newest"

            [worker]
            name = "worker-a"
            batch_size = 20
        "#,
        )
        .unwrap();

        let options = config.gateway.identify_options().unwrap();
        assert_eq!(options.shard, Some(ShardInfo::new(1, 4).unwrap()));
        assert_eq!(options.initial_presence, Some(PresenceStatus::Idle));
        assert_eq!(
            config.bus.policy().unwrap(),
            BufferPolicy::bounded(64, Overflow::DropNewest)
        );
        assert_eq!(config.worker.name.as_deref(), Some("worker-a"));
        assert_eq!(config.worker.batch_size, 20);
    }

    #[test]
    fn test_validation_shard_out_of_range() {
        let result = RelayConfig::parse(
            r#"
            [gateway]
            shard_index = 2
            shard_count = 2
        "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_half_configured_shard() {
        let result = RelayConfig::parse(
            r#"
            [gateway]
            shard_count = 2
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_invalid_redis_url() {
        let result = RelayConfig::parse(
            r#"
            [redis]
            url = "http://localhost:6379"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_invalid_overflow() {
        let result = RelayConfig::parse(
            r#"
            [receiving]
            capacity = 10
            overflow = "newest_wins"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_invalid_rest_url() {
        let result = RelayConfig::parse(
            r#"
            [rest]
            base_url = "discord.com/api"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_placeholder_token_is_unset() {
        let config = RelayConfig::parse(
            r#"
            [rest]
            token = "${RELAY_UNSET_TOKEN_VAR}"
        "#,
        )
        .unwrap();
        assert!(config.rest.token().is_none());
    }

    #[test]
    fn test_consumer_group_per_worker() {
        let config = RelayConfig::default();
        assert_ne!(config.worker.group("worker-a"), config.worker.group("worker-b"));

        let pinned = RelayConfig::parse(
            r#"
            [worker]
            consumer_group = "shard-0"
        "#,
        )
        .unwrap();
        assert_eq!(pinned.worker.group("worker-a"), "shard-0");

        let empty = RelayConfig::parse(
            r#"
            [worker]
            consumer_group = ""
        "#,
        );
        assert!(matches!(empty, Err(ConfigError::ValidationError(_))));
    }
}
