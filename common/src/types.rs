use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 会话令牌
///
/// 由宿主递增，用于在不改变流ID的情况下强制完整重连
pub type SessionToken = u64;

/// 传输类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    /// 低延迟点对点传输（首选）
    LowLatency,
    /// 分片传输（回退）
    Segmented,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::LowLatency => write!(f, "low-latency"),
            TransportKind::Segmented => write!(f, "segmented"),
        }
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Playing,
    Stalled,
    Error,
}

impl ConnectionStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionStatus::Error)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Playing => "playing",
            ConnectionStatus::Stalled => "stalled",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// 宿主提供的流配置
///
/// 字段名与宿主前端保持一致（camelCase）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub stream_id: String,
    #[serde(default)]
    pub low_latency_endpoint: Option<String>,
    #[serde(default)]
    pub segmented_source_url: Option<String>,
    #[serde(default)]
    pub session_token: SessionToken,
}

impl StreamConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            low_latency_endpoint: None,
            segmented_source_url: None,
            session_token: 0,
        }
    }

    pub fn with_low_latency(mut self, endpoint: impl Into<String>) -> Self {
        self.low_latency_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_segmented(mut self, url: impl Into<String>) -> Self {
        self.segmented_source_url = Some(url.into());
        self
    }

    pub fn with_token(mut self, token: SessionToken) -> Self {
        self.session_token = token;
        self
    }

    /// 解析为一次会话内不可变的流目标
    pub fn resolve(&self) -> StreamTarget {
        StreamTarget {
            stream_id: self.stream_id.clone(),
            low_latency_endpoint: non_empty(&self.low_latency_endpoint),
            segmented_source_url: non_empty(&self.segmented_source_url),
            session_token: self.session_token,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 已解析的流目标
///
/// 一旦解析在会话期间不可变；流ID或令牌变化时必须完整重建
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub stream_id: String,
    pub low_latency_endpoint: Option<String>,
    pub segmented_source_url: Option<String>,
    pub session_token: SessionToken,
}

impl StreamTarget {
    pub fn has_fallback(&self) -> bool {
        self.segmented_source_url.is_some()
    }
}

/// 对宿主发布的统一状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub transport: TransportKind,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(transport: TransportKind, status: ConnectionStatus, error: Option<String>) -> Self {
        Self {
            transport,
            status,
            error,
            timestamp: Utc::now(),
        }
    }

    /// 判断两次更新对宿主而言是否相同（忽略时间戳）
    pub fn same_as(&self, other: &StatusUpdate) -> bool {
        self.transport == other.transport && self.status == other.status && self.error == other.error
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}({}): {}", self.status, self.transport, err),
            None => write!(f, "{}({})", self.status, self.transport),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_deserialize_camel_case() {
        let json = r#"{
            "streamId": "A",
            "lowLatencyEndpoint": "wss://x",
            "segmentedSourceUrl": "https://y/index.m3u8",
            "sessionToken": 1
        }"#;

        let config: StreamConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stream_id, "A");
        assert_eq!(config.low_latency_endpoint.as_deref(), Some("wss://x"));
        assert_eq!(config.segmented_source_url.as_deref(), Some("https://y/index.m3u8"));
        assert_eq!(config.session_token, 1);
    }

    #[test]
    fn test_optional_fields_default() {
        let config: StreamConfig = serde_json::from_str(r#"{"streamId": "cam-7"}"#).unwrap();
        assert!(config.low_latency_endpoint.is_none());
        assert!(config.segmented_source_url.is_none());
        assert_eq!(config.session_token, 0);
    }

    #[test]
    fn test_resolve_drops_blank_urls() {
        let target = StreamConfig::new("A")
            .with_low_latency("  ")
            .with_segmented("https://y/index.m3u8")
            .resolve();

        assert!(target.low_latency_endpoint.is_none());
        assert!(target.has_fallback());
    }

    #[test]
    fn test_status_update_serialization() {
        let update = StatusUpdate::new(TransportKind::Segmented, ConnectionStatus::Playing, None);
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["transport"], "segmented");
        assert_eq!(value["status"], "playing");
        assert!(value["error"].is_null());
    }

    #[test]
    fn test_same_as_ignores_timestamp() {
        let a = StatusUpdate::new(TransportKind::LowLatency, ConnectionStatus::Connecting, None);
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::seconds(3);
        assert!(a.same_as(&b));

        b.status = ConnectionStatus::Error;
        assert!(!a.same_as(&b));
    }
}
