// 分片传输会话
//
// 把分片引擎（或渲染面的原生播放能力）绑定到渲染面，并把媒体/引擎事件
// 归一化为统一状态：
//
// - `connecting → playing`
// - `playing ⇄ stalled`（分片欠载）
// - `error`（致命解码/网络错误，含原生播放错误）
//
// 引擎的非致命错误被吞掉，不改变状态。

use super::{EventSink, SessionId};
use crate::surface::{ListenerGuard, RenderSurface, SurfaceLease};
use common::{
    ConnectionStatus, MediaEvent, PlayerError, Result, SegmentedEvent, SessionReport, SessionToken,
    TransportKind,
};
use tracing::{debug, info, warn};

/// 分片引擎实例
pub trait EngineInstance: Send {
    /// 销毁实例，停止所有网络请求
    fn destroy(&mut self);
}

/// 分片引擎（外部库）
pub trait SegmentedEngine: Send + Sync {
    /// 当前环境是否可用
    fn is_supported(&self) -> bool;

    /// 加载源地址并输出到渲染面
    ///
    /// 媒体事件通过 `RenderSurface::dispatch` 派发，引擎自身的错误通过 `sink` 上报。
    fn load(
        &self,
        url: &str,
        surface: &RenderSurface,
        sink: EventSink,
    ) -> Result<Box<dyn EngineInstance>>;
}

/// 为源地址追加会话令牌，防止重新挂载时命中过期的播放列表缓存
pub fn cache_bust(url: &str, token: SessionToken) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}v={}", url, separator, token)
}

enum Backend {
    Engine(Box<dyn EngineInstance>),
    Native,
}

impl Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::Engine(_) => "engine",
            Backend::Native => "native",
        }
    }
}

pub struct SegmentedSession {
    id: SessionId,
    url: String,
    surface: RenderSurface,
    lease: SurfaceLease,
    listener: Option<ListenerGuard>,
    backend: Option<Backend>,
    status: ConnectionStatus,
}

impl SegmentedSession {
    /// 绑定分片会话到渲染面
    ///
    /// 优先使用分片引擎，引擎不可用时退回渲染面原生播放，两者都不可用返回 `Unsupported`。
    /// 任何失败路径上已获取的绑定和监听器都会随 drop 释放。
    pub fn bind(
        engine: Option<&dyn SegmentedEngine>,
        source_url: &str,
        token: SessionToken,
        surface: &RenderSurface,
        sink: EventSink,
    ) -> Result<Self> {
        let id = sink.session();
        let url = cache_bust(source_url, token);

        let use_engine = engine.filter(|e| e.is_supported());
        if use_engine.is_none() && !surface.supports_native_playback() {
            warn!(surface = surface.name(), "No segmented playback available");
            return Err(PlayerError::Unsupported);
        }

        let lease = surface.bind(TransportKind::Segmented, id)?;
        let listener = surface.add_listener(sink.clone());

        let backend = match use_engine {
            Some(engine) => Backend::Engine(engine.load(&url, surface, sink)?),
            None => {
                surface.set_source(&url);
                Backend::Native
            }
        };

        info!(
            session = %id,
            backend = backend.name(),
            url = %url,
            "Segmented session bound"
        );

        Ok(Self {
            id,
            url,
            surface: surface.clone(),
            lease,
            listener: Some(listener),
            backend: Some(backend),
            status: ConnectionStatus::Connecting,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_bound(&self) -> bool {
        self.backend.is_some()
    }

    /// 处理事件，状态变化时返回新的上报
    pub fn handle_event(&mut self, event: SegmentedEvent) -> Option<SessionReport> {
        if !self.is_bound() || self.status == ConnectionStatus::Error {
            return None;
        }

        let report = match event {
            SegmentedEvent::Media(MediaEvent::LoadedData) | SegmentedEvent::Media(MediaEvent::Playing) => {
                SessionReport::status(ConnectionStatus::Playing)
            }
            SegmentedEvent::Media(MediaEvent::Waiting) | SegmentedEvent::Media(MediaEvent::Stalled) => {
                // 首帧之前的等待仍属于连接中
                if self.status == ConnectionStatus::Connecting {
                    return None;
                }
                SessionReport::status(ConnectionStatus::Stalled)
            }
            SegmentedEvent::Media(MediaEvent::Error { message }) => {
                SessionReport::error(message.unwrap_or_else(|| "media playback error".to_string()))
            }
            SegmentedEvent::Engine(err) if err.fatal => SessionReport::error(err.detail),
            SegmentedEvent::Engine(err) => {
                debug!(session = %self.id, detail = %err.detail, "Non-fatal engine error ignored");
                return None;
            }
        };

        if report.status == self.status {
            return None;
        }

        debug!(session = %self.id, from = %self.status, to = %report.status, "Segmented status change");
        self.status = report.status;
        Some(report)
    }

    /// 解绑（幂等）：注销监听器、销毁引擎或卸下原生源、释放渲染面
    pub fn unbind(&mut self) -> bool {
        let Some(backend) = self.backend.take() else {
            return false;
        };

        if let Some(mut listener) = self.listener.take() {
            listener.remove();
        }

        match backend {
            Backend::Engine(mut instance) => instance.destroy(),
            Backend::Native => self.surface.clear_source(),
        }

        self.lease.release();
        self.status = ConnectionStatus::Idle;
        info!(session = %self.id, "Segmented session unbound");
        true
    }
}

impl Drop for SegmentedSession {
    fn drop(&mut self) {
        self.unbind();
    }
}
