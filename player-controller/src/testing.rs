// 测试用的脚本化协作者

use crate::arbiter::TransportArbiter;
use crate::surface::RenderSurface;
use crate::transport::{
    ArbiterEvent, EngineInstance, EventSink, LowLatencyConnector, LowLatencySession,
    SegmentedEngine, StatusSink,
};
use common::{
    ConnectionStatus, MediaEvent, PlayerError, Result, SegmentedEvent, SessionReport,
    StatusUpdate, TransportKind,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn playing() -> SessionReport {
    SessionReport::status(ConnectionStatus::Playing)
}

pub fn connecting() -> SessionReport {
    SessionReport::status(ConnectionStatus::Connecting)
}

pub fn failed(message: &str) -> SessionReport {
    SessionReport::error(message)
}

/// 把排队的事件全部交给仲裁器处理
pub fn drain(arbiter: &mut TransportArbiter, rx: &mut mpsc::UnboundedReceiver<ArbiterEvent>) {
    while let Ok(event) = rx.try_recv() {
        arbiter.handle_event(event);
    }
}

/// 取出广播接收端中已有的全部状态
pub fn collect(rx: &mut broadcast::Receiver<StatusUpdate>) -> Vec<(TransportKind, ConnectionStatus)> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|u| (u.transport, u.status))
        .collect()
}

#[derive(Default)]
struct ConnectorState {
    scripts: VecDeque<Vec<SessionReport>>,
    fallback: Vec<SessionReport>,
    endpoints: Vec<String>,
    sinks: Vec<StatusSink>,
    attaches: Vec<usize>,
    closes: usize,
    idle_on_close: bool,
}

/// 低延迟协商器模拟
///
/// 每次 `connect` 依次取出一段脚本并同步上报；脚本用完后使用默认脚本。
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次连接的上报脚本
    pub fn then(self, reports: Vec<SessionReport>) -> Self {
        self.state.lock().scripts.push_back(reports);
        self
    }

    /// 脚本用完后每次连接的上报
    pub fn otherwise(self, reports: Vec<SessionReport>) -> Self {
        self.state.lock().fallback = reports;
        self
    }

    /// 关闭时上报 idle（模拟迟到的回调）
    pub fn idle_on_close(self) -> Self {
        self.state.lock().idle_on_close = true;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().endpoints.clone()
    }

    /// 第 `index` 次连接的回调
    pub fn sink(&self, index: usize) -> Option<StatusSink> {
        self.state.lock().sinks.get(index).cloned()
    }

    /// 被挂载过的连接序号
    pub fn attached(&self) -> Vec<usize> {
        self.state.lock().attaches.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

impl LowLatencyConnector for MockConnector {
    fn connect(&self, endpoint: &str, sink: StatusSink) -> Box<dyn LowLatencySession> {
        let (index, reports, idle_on_close) = {
            let mut state = self.state.lock();
            let index = state.endpoints.len();
            state.endpoints.push(endpoint.to_string());
            state.sinks.push(sink.clone());
            let reports = match state.scripts.pop_front() {
                Some(reports) => reports,
                None => state.fallback.clone(),
            };
            (index, reports, state.idle_on_close)
        };

        for report in reports {
            sink.report(report);
        }

        Box::new(MockSession {
            index,
            sink,
            state: self.state.clone(),
            idle_on_close,
        })
    }
}

struct MockSession {
    index: usize,
    sink: StatusSink,
    state: Arc<Mutex<ConnectorState>>,
    idle_on_close: bool,
}

impl LowLatencySession for MockSession {
    fn attach(&mut self, _surface: &RenderSurface) {
        self.state.lock().attaches.push(self.index);
    }

    fn close(&mut self) {
        self.state.lock().closes += 1;
        if self.idle_on_close {
            self.sink.idle();
        }
    }
}

#[derive(Default)]
struct EngineState {
    unsupported: bool,
    load_error: Option<String>,
    script: Vec<SegmentedEvent>,
    loaded_urls: Vec<String>,
    sinks: Vec<EventSink>,
    destroyed: usize,
}

/// 分片引擎模拟
///
/// 加载时按脚本派发事件：媒体事件经渲染面监听器送达，引擎错误经回调送达。
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载后立即开始播放
    pub fn playing() -> Self {
        Self::new().with_script(vec![SegmentedEvent::Media(MediaEvent::Playing)])
    }

    pub fn unsupported() -> Self {
        let engine = Self::new();
        engine.state.lock().unsupported = true;
        engine
    }

    pub fn failing_load(message: &str) -> Self {
        let engine = Self::new();
        engine.state.lock().load_error = Some(message.to_string());
        engine
    }

    /// 之后的加载恢复正常
    pub fn clear_load_error(&self) {
        self.state.lock().load_error = None;
    }

    pub fn with_script(self, script: Vec<SegmentedEvent>) -> Self {
        self.state.lock().script = script;
        self
    }

    pub fn loaded_urls(&self) -> Vec<String> {
        self.state.lock().loaded_urls.clone()
    }

    pub fn destroyed_count(&self) -> usize {
        self.state.lock().destroyed
    }

    /// 最近一次加载的回调
    pub fn last_sink(&self) -> Option<EventSink> {
        self.state.lock().sinks.last().cloned()
    }
}

impl SegmentedEngine for MockEngine {
    fn is_supported(&self) -> bool {
        !self.state.lock().unsupported
    }

    fn load(
        &self,
        url: &str,
        surface: &RenderSurface,
        sink: EventSink,
    ) -> Result<Box<dyn EngineInstance>> {
        let script = {
            let mut state = self.state.lock();
            if let Some(message) = &state.load_error {
                return Err(PlayerError::Transport {
                    kind: TransportKind::Segmented,
                    message: message.clone(),
                });
            }
            state.loaded_urls.push(url.to_string());
            state.sinks.push(sink.clone());
            state.script.clone()
        };

        for event in script {
            match event {
                SegmentedEvent::Media(media) => {
                    surface.dispatch(media);
                }
                SegmentedEvent::Engine(err) => {
                    sink.engine_error(err.fatal, err.detail);
                }
            }
        }

        Ok(Box::new(MockInstance {
            state: self.state.clone(),
        }))
    }
}

struct MockInstance {
    state: Arc<Mutex<EngineState>>,
}

impl EngineInstance for MockInstance {
    fn destroy(&mut self) {
        self.state.lock().destroyed += 1;
    }
}
