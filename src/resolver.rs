//! Lazy REST lookups for data a dispatch does not carry.
//!
//! Handlers consult the [`EntityResolver`] only when the cache cannot answer
//! and the domain event needs the value, e.g. the guild of a channel that
//! was never streamed.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::resolver::RestResolver;
//! use std::time::Duration;
//!
//! let resolver = RestResolver::new("https://discord.com/api/v10")
//!     .with_token(token)
//!     .with_timeout(Duration::from_secs(5));
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::ChannelSnapshot;
use crate::handlers::wire::ChannelData;
use crate::payload::Snowflake;

/// Default REST API base URL
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Default timeout for REST lookups
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from resolver lookups.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read-only lookups backed by the REST API.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Resolver name for logging
    fn name(&self) -> &str;

    /// Fetch a channel. `Ok(None)` when it does not exist.
    async fn channel(&self, id: Snowflake) -> Result<Option<ChannelSnapshot>, ResolveError>;
}

/// Resolver that knows nothing. Used when no REST access is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl EntityResolver for NoopResolver {
    fn name(&self) -> &str {
        "noop"
    }

    async fn channel(&self, _id: Snowflake) -> Result<Option<ChannelSnapshot>, ResolveError> {
        Ok(None)
    }
}

/// Resolver issuing authenticated GET requests.
#[derive(Debug, Clone)]
pub struct RestResolver {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl RestResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the bot token sent as `Authorization: Bot <token>`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn channel_url(&self, id: Snowflake) -> String {
        format!("{}/channels/{}", self.base_url, id)
    }
}

#[async_trait]
impl EntityResolver for RestResolver {
    fn name(&self) -> &str {
        "rest"
    }

    async fn channel(&self, id: Snowflake) -> Result<Option<ChannelSnapshot>, ResolveError> {
        let url = self.channel_url(id);
        debug!(url = %url, "Resolving channel");

        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bot {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(channel_id = %id, "Channel not found");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(channel_id = %id, status = status.as_u16(), "Channel lookup failed");
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let data: ChannelData = serde_json::from_slice(&body)?;
        Ok(Some(data.into_snapshot(None)))
    }
}
