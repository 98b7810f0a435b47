use serde::{Deserialize, Serialize};

use crate::models::{TableChange, TableId};

// ==================== Payloads ====================

/// 握手载荷 (客户端 -> 服务端)
///
/// 包含客户端的协议版本信息，用于服务端进行版本校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// 协议版本
    pub version: u16,
    /// 客户端名称/标识
    pub client_name: Option<String>,
    /// 客户端版本
    pub client_version: Option<String>,
    /// 客户端唯一标识 (UUID)
    pub client_id: Option<String>,
}

/// 订阅载荷 (客户端 -> 服务端)
///
/// 服务端只转发该桌台的变更 (服务端过滤)。
/// `Unsubscribe` 使用同一载荷。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub table_id: TableId,
}

/// 桌台变更载荷 (服务端 -> 订阅客户端)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChangedPayload {
    /// 变更后的行 (至少包含 id 与 needs_attention)
    pub change: TableChange,
    /// 提交时间 (UTC 毫秒)
    pub committed_at: i64,
}

/// 通用响应载荷 (服务端 -> 客户端)
///
/// 用于响应 Subscribe / Unsubscribe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// 是否成功
    pub success: bool,
    /// 响应消息/错误描述
    pub message: String,
    /// 错误代码 (可选, 仅在失败时有用)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

// ==================== Convenience Constructors ====================

impl TableChangedPayload {
    pub fn now(change: TableChange) -> Self {
        Self {
            change,
            committed_at: crate::util::now_millis(),
        }
    }
}

impl ResponsePayload {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_code: code,
        }
    }
}
