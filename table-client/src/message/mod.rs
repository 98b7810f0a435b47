// table-client/src/message/mod.rs
// 消息模块 - 推送通道配置和错误类型

pub mod client;
pub mod transport;

pub use client::FeedClient;
pub use shared::message::{BusMessage, EventType};
pub use transport::{MemoryTransport, TcpTransport, Transport};

use std::time::Duration;
use thiserror::Error;

/// 推送通道错误
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 推送客户端配置
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// 订阅请求超时
    pub request_timeout: Duration,
    /// 每个订阅的缓冲区大小
    pub subscription_buffer: usize,
    /// 客户端名称 (握手时上报)
    pub client_name: String,
}

impl Default for FeedClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            subscription_buffer: 64,
            client_name: "table-client".to_string(),
        }
    }
}

impl FeedClientConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置请求超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 设置客户端名称
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// 设置订阅缓冲区大小
    pub fn with_subscription_buffer(mut self, capacity: usize) -> Self {
        self.subscription_buffer = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = FeedClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.subscription_buffer, 64);
    }

    #[test]
    fn test_config_builder() {
        let config = FeedClientConfig::new()
            .with_request_timeout(Duration::from_secs(1))
            .with_client_name("mesa-7")
            .with_subscription_buffer(0);

        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.client_name, "mesa-7");
        assert_eq!(config.subscription_buffer, 1);
    }
}
