//! 变更推送消息类型定义
//!
//! 这些类型在桌台客户端和推送服务端之间共享，用于
//! 进程内（内存）和网络（TCP）通信。
//!
//! # 帧格式
//!
//! ```text
//! ┌──────────┬────────────┬────────────────┬─────────────┬─────────────┐
//! │ type (1) │ request(16)│ correlation(16)│ len (4, LE) │ JSON payload│
//! └──────────┴────────────┴────────────────┴─────────────┴─────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

use crate::models::{TableChange, TableId};

pub mod payload;
pub use payload::*;

/// 协议版本号
pub const PROTOCOL_VERSION: u16 = 1;

/// 帧头长度: type + request_id + correlation_id + len
pub const FRAME_HEADER_LEN: usize = 1 + 16 + 16 + 4;

/// 单帧载荷上限
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// 推送通道事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 握手消息
    Handshake = 0,
    /// 订阅某张桌台
    Subscribe = 1,
    /// 取消订阅
    Unsubscribe = 2,
    /// 桌台行变更
    TableChanged = 3,
    /// 请求响应
    Response = 4,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Handshake),
            1 => Ok(EventType::Subscribe),
            2 => Ok(EventType::Unsubscribe),
            3 => Ok(EventType::TableChanged),
            4 => Ok(EventType::Response),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Handshake => write!(f, "handshake"),
            EventType::Subscribe => write!(f, "subscribe"),
            EventType::Unsubscribe => write!(f, "unsubscribe"),
            EventType::TableChanged => write!(f, "table_changed"),
            EventType::Response => write!(f, "response"),
        }
    }
}

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    pub correlation_id: Option<Uuid>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            correlation_id: None,
            payload,
        }
    }

    /// 以 JSON 载荷创建消息
    pub fn with_payload<T: Serialize>(
        event_type: EventType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_vec(payload)?))
    }

    /// 设置关联 ID (用于 RPC 响应)
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// 创建握手消息
    pub fn handshake(payload: &HandshakePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(EventType::Handshake, payload)
    }

    /// 创建订阅消息
    pub fn subscribe(table_id: TableId) -> Result<Self, serde_json::Error> {
        Self::with_payload(EventType::Subscribe, &SubscribePayload { table_id })
    }

    /// 创建取消订阅消息
    pub fn unsubscribe(table_id: TableId) -> Result<Self, serde_json::Error> {
        Self::with_payload(EventType::Unsubscribe, &SubscribePayload { table_id })
    }

    /// 创建桌台变更消息
    pub fn table_changed(change: TableChange) -> Result<Self, serde_json::Error> {
        Self::with_payload(EventType::TableChanged, &TableChangedPayload::now(change))
    }

    /// 创建响应消息
    pub fn response(payload: &ResponsePayload) -> Result<Self, serde_json::Error> {
        Self::with_payload(EventType::Response, payload)
    }

    /// 解析载荷为指定类型
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// 编码为线上帧
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        data.push(self.event_type as u8);
        data.extend_from_slice(self.request_id.as_bytes());
        let correlation_bytes = self.correlation_id.unwrap_or(Uuid::nil()).into_bytes();
        data.extend_from_slice(&correlation_bytes);
        data.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&self.payload);
        data
    }
}

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub event_type: EventType,
    pub request_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub payload_len: usize,
}

impl FrameHeader {
    /// 解析帧头, 非法类型或超长载荷返回错误描述
    pub fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Result<Self, String> {
        let event_type = EventType::try_from(buf[0])
            .map_err(|_| format!("Invalid event type: {}", buf[0]))?;

        let mut uuid_buf = [0u8; 16];
        uuid_buf.copy_from_slice(&buf[1..17]);
        let request_id = Uuid::from_bytes(uuid_buf);

        uuid_buf.copy_from_slice(&buf[17..33]);
        let correlation_raw = Uuid::from_bytes(uuid_buf);
        let correlation_id = if correlation_raw.is_nil() {
            None
        } else {
            Some(correlation_raw)
        };

        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&buf[33..37]);
        let payload_len = u32::from_le_bytes(len_buf) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(format!("Payload too large: {} bytes", payload_len));
        }

        Ok(Self {
            event_type,
            request_id,
            correlation_id,
            payload_len,
        })
    }

    pub fn into_message(self, payload: Vec<u8>) -> BusMessage {
        BusMessage {
            request_id: self.request_id,
            event_type: self.event_type,
            correlation_id: self.correlation_id,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_message() {
        let payload = HandshakePayload {
            version: PROTOCOL_VERSION,
            client_name: Some("test-client".to_string()),
            client_version: Some("0.1.0".to_string()),
            client_id: None,
        };

        let msg = BusMessage::handshake(&payload).unwrap();
        assert_eq!(msg.event_type, EventType::Handshake);
        assert!(!msg.request_id.is_nil());

        let parsed: HandshakePayload = msg.parse_payload().unwrap();
        assert_eq!(parsed.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_frame_header() {
        let reply_to = Uuid::new_v4();
        let msg = BusMessage::response(&ResponsePayload::success("subscribed"))
            .unwrap()
            .with_correlation_id(reply_to);
        let frame = msg.encode();

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
        let header = FrameHeader::decode(&header).unwrap();
        assert_eq!(header.event_type, EventType::Response);
        assert_eq!(header.correlation_id, Some(reply_to));
        assert_eq!(header.payload_len, frame.len() - FRAME_HEADER_LEN);

        let decoded = header.into_message(frame[FRAME_HEADER_LEN..].to_vec());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_frame_header_rejects_unknown_type() {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = 42;
        assert!(FrameHeader::decode(&header).is_err());
    }

    #[test]
    fn test_table_changed_payload() {
        let msg = BusMessage::table_changed(TableChange::attention(9, true)).unwrap();
        let payload: TableChangedPayload = msg.parse_payload().unwrap();
        assert_eq!(payload.change.id, 9);
        assert!(payload.change.needs_attention);
        assert!(payload.committed_at > 0);
    }
}
