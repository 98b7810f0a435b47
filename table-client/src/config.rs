//! Client configuration
//!
//! # 环境变量
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | TABLE_API_URL | http://localhost:54321 | REST 行存储地址 |
//! | TABLE_API_KEY | - | 匿名访问 key |
//! | TABLE_API_TIMEOUT | 10 | 请求超时(秒) |
//! | TABLE_RESOURCE | dining_tables | 桌台表名 |
//! | TABLE_FEED_ADDR | - | 推送通道 TCP 地址 |
//! | TABLE_FAILURE_POLICY | strict | 加载失败策略 strict / lenient |
//! | TABLE_AUTO_RESET_MS | 5000 | "已处理" 提示自动返回时间 |

use std::time::Duration;

use crate::fetcher::FetchFailurePolicy;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Client configuration for connecting to the table backend
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL (e.g., "http://localhost:54321")
    pub base_url: String,

    /// Anonymous API key, sent as `apikey` and bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Table resource name
    pub resource: String,

    /// Change feed TCP address
    pub feed_addr: Option<String>,
}

impl ClientConfig {
    /// Create a new client configuration
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: 10,
            resource: "dining_tables".to_string(),
            feed_addr: None,
        }
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var("TABLE_API_URL").unwrap_or_else(|_| "http://localhost:54321".into()),
        );
        config.api_key = std::env::var("TABLE_API_KEY").ok().filter(|k| !k.is_empty());
        if let Some(timeout) = env_parse("TABLE_API_TIMEOUT") {
            config.timeout = timeout;
        }
        if let Ok(resource) = std::env::var("TABLE_RESOURCE") {
            config.resource = resource;
        }
        config.feed_addr = std::env::var("TABLE_FEED_ADDR").ok().filter(|a| !a.is_empty());
        config
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the table resource name
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Set the change feed address
    pub fn with_feed_addr(mut self, addr: impl Into<String>) -> Self {
        self.feed_addr = Some(addr.into());
        self
    }

    /// Create an HTTP client from this configuration
    pub fn build_http_client(&self) -> crate::ClientResult<super::HttpClient> {
        super::HttpClient::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:54321")
    }
}

/// Per-session behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// What a failed initial fetch turns into
    pub failure_policy: FetchFailurePolicy,
    /// How long the "attended" banner stays before returning to idle
    pub auto_reset: Duration,
    /// Capacity of the session's event queue
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FetchFailurePolicy::Strict,
            auto_reset: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(policy) = std::env::var("TABLE_FAILURE_POLICY") {
            match policy.parse() {
                Ok(policy) => config.failure_policy = policy,
                Err(e) => tracing::warn!("Ignoring TABLE_FAILURE_POLICY: {}", e),
            }
        }
        if let Some(ms) = env_parse::<u64>("TABLE_AUTO_RESET_MS") {
            config.auto_reset = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_failure_policy(mut self, policy: FetchFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_auto_reset(mut self, delay: Duration) -> Self {
        self.auto_reset = delay;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("http://db.local")
            .with_api_key("anon")
            .with_timeout(3)
            .with_feed_addr("127.0.0.1:4000");

        assert_eq!(config.base_url, "http://db.local");
        assert_eq!(config.api_key.as_deref(), Some("anon"));
        assert_eq!(config.timeout, 3);
        assert_eq!(config.resource, "dining_tables");
        assert_eq!(config.feed_addr.as_deref(), Some("127.0.0.1:4000"));
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.failure_policy, FetchFailurePolicy::Strict);
        assert_eq!(config.auto_reset, Duration::from_secs(5));
    }
}
