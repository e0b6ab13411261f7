use crate::types::ConnectionStatus;
use serde::{Deserialize, Serialize};

/// 传输会话上报的状态（低延迟协商器 / 分片会话）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionReport {
    pub status: ConnectionStatus,
    pub error: Option<String>,
}

impl SessionReport {
    pub fn status(status: ConnectionStatus) -> Self {
        Self { status, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// 渲染面上的媒体生命周期事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaEvent {
    LoadedData,
    Playing,
    Waiting,
    Stalled,
    Error { message: Option<String> },
}

impl MediaEvent {
    /// 按媒体元素事件名解析
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "loadeddata" => Some(MediaEvent::LoadedData),
            "playing" => Some(MediaEvent::Playing),
            "waiting" => Some(MediaEvent::Waiting),
            "stalled" => Some(MediaEvent::Stalled),
            "error" => Some(MediaEvent::Error { message: None }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::LoadedData => "loadeddata",
            MediaEvent::Playing => "playing",
            MediaEvent::Waiting => "waiting",
            MediaEvent::Stalled => "stalled",
            MediaEvent::Error { .. } => "error",
        }
    }
}

/// 分片引擎自身的错误事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineError {
    pub fatal: bool,
    pub detail: String,
}

/// 分片会话接收的所有事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SegmentedEvent {
    /// 渲染面媒体事件
    Media(MediaEvent),
    /// 引擎错误事件
    Engine(EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_event_names() {
        for name in ["loadeddata", "playing", "waiting", "stalled", "error"] {
            let event = MediaEvent::from_name(name).unwrap();
            assert_eq!(event.name(), name);
        }
        assert!(MediaEvent::from_name("timeupdate").is_none());
    }

    #[test]
    fn test_segmented_event_json() {
        let json = r#"{"source":"engine","fatal":true,"detail":"manifestLoadError"}"#;
        let event: SegmentedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SegmentedEvent::Engine(EngineError {
                fatal: true,
                detail: "manifestLoadError".to_string(),
            })
        );
    }
}
