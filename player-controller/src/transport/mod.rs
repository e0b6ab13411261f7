// 传输会话模块
//
// 低延迟会话只定义协作接口（协商器由外部实现），分片会话在本模块内实现。
// 所有会话都通过带会话ID的回调通道把事件送回仲裁器，仲裁器据此丢弃
// 已拆除会话的迟到事件。

pub mod low_latency;
pub mod segmented;

use common::{ConnectionStatus, EngineError, MediaEvent, SegmentedEvent, SessionReport};
use std::fmt;
use tokio::sync::mpsc;

pub use low_latency::{LowLatencyConnector, LowLatencySession};
pub use segmented::{cache_bust, EngineInstance, SegmentedEngine, SegmentedSession};

/// 单个控制器内唯一的传输会话ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 仲裁器事件
#[derive(Debug, Clone)]
pub enum ArbiterEvent {
    /// 低延迟会话状态回调
    LowLatency { session: SessionId, report: SessionReport },
    /// 分片会话的媒体/引擎事件
    Segmented { session: SessionId, event: SegmentedEvent },
    /// 恢复定时器到期
    RecoveryDue { generation: u64 },
}

/// 低延迟协商器的状态回调
#[derive(Clone)]
pub struct StatusSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<ArbiterEvent>,
}

impl StatusSink {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<ArbiterEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// 上报状态，控制器已退出时返回 false
    pub fn report(&self, report: SessionReport) -> bool {
        self.tx
            .send(ArbiterEvent::LowLatency {
                session: self.session,
                report,
            })
            .is_ok()
    }

    pub fn connecting(&self) -> bool {
        self.report(SessionReport::status(ConnectionStatus::Connecting))
    }

    pub fn playing(&self) -> bool {
        self.report(SessionReport::status(ConnectionStatus::Playing))
    }

    pub fn stalled(&self) -> bool {
        self.report(SessionReport::status(ConnectionStatus::Stalled))
    }

    pub fn idle(&self) -> bool {
        self.report(SessionReport::status(ConnectionStatus::Idle))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.report(SessionReport::error(message))
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink").field("session", &self.session).finish()
    }
}

/// 分片会话的事件回调（渲染面监听器与引擎错误共用）
#[derive(Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<ArbiterEvent>,
}

impl EventSink {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<ArbiterEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn emit(&self, event: SegmentedEvent) -> bool {
        self.tx
            .send(ArbiterEvent::Segmented {
                session: self.session,
                event,
            })
            .is_ok()
    }

    pub fn media(&self, event: MediaEvent) -> bool {
        self.emit(SegmentedEvent::Media(event))
    }

    pub fn engine_error(&self, fatal: bool, detail: impl Into<String>) -> bool {
        self.emit(SegmentedEvent::Engine(EngineError {
            fatal,
            detail: detail.into(),
        }))
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("session", &self.session).finish()
    }
}
