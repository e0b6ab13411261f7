// 传输仲裁器（故障切换状态机）
//
// 状态：
//
// ```text
// PreferLowLatency --低延迟 error 且有回退地址--> UsingSegmented
// UsingSegmented   --恢复定时器到期-------------> RecoveringToLowLatency
// RecoveringToLowLatency --候选会话 playing-----> PreferLowLatency（提升）
// RecoveringToLowLatency --候选会话 error-------> UsingSegmented（重新布置定时器）
// 分片加载失败且有低延迟地址 ----------------> UsingSegmented（未绑定，继续恢复）
// 任意状态 --流ID/令牌变化--> PreferLowLatency（预算清零）
// 任意状态 --stop----------> Idle
// ```
//
// 仲裁器只在单个控制上下文中运行，所有转换都由离散事件驱动。

mod timer;

pub use timer::RecoveryTimer;

use crate::config::ControllerSettings;
use crate::publisher::StatusPublisher;
use crate::surface::{RenderSurface, SurfaceLease};
use crate::transport::{
    ArbiterEvent, EventSink, LowLatencyConnector, LowLatencySession, SegmentedEngine,
    SegmentedSession, SessionId, StatusSink,
};
use common::{
    ConnectionStatus, PlayerError, SegmentedEvent, SessionReport, StreamConfig, StreamTarget,
    TransportKind,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 仲裁器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArbiterState {
    /// 未启动或已停止
    Idle,
    /// 首选低延迟（初始状态；无回退时为降级状态）
    PreferLowLatency,
    /// 分片传输服务中
    UsingSegmented,
    /// 分片服务中，后台尝试恢复低延迟
    RecoveringToLowLatency,
    /// 无可用传输
    Failed,
}

/// 恢复尝试预算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryBudget {
    attempts: u32,
    ceiling: u32,
}

impl RetryBudget {
    pub fn new(ceiling: u32) -> Self {
        Self { attempts: 0, ceiling }
    }

    /// 占用一次尝试，已达上限时返回 false
    pub fn try_consume(&mut self) -> bool {
        if self.attempts >= self.ceiling {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.ceiling
    }
}

/// 仲裁器状态快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbiterSnapshot {
    pub instance_id: Uuid,
    pub stream_id: Option<String>,
    pub state: ArbiterState,
    pub active: Option<TransportKind>,
    pub retry_attempts: u32,
    pub retry_ceiling: u32,
    pub recovery_pending: bool,
}

/// 低延迟会话及其渲染面绑定
struct LowLatencyBinding {
    id: SessionId,
    session: Box<dyn LowLatencySession>,
    lease: Option<SurfaceLease>,
    closed: bool,
}

impl LowLatencyBinding {
    fn attach(&mut self, lease: SurfaceLease) {
        self.session.attach(lease.surface());
        self.lease = Some(lease);
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.close();
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
        debug!(session = %self.id, "Low-latency session closed");
    }
}

impl Drop for LowLatencyBinding {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct TransportArbiter {
    id: Uuid,
    settings: ControllerSettings,
    surface: RenderSurface,
    connector: Arc<dyn LowLatencyConnector>,
    engine: Option<Arc<dyn SegmentedEngine>>,
    events: mpsc::UnboundedSender<ArbiterEvent>,
    publisher: StatusPublisher,
    timer: RecoveryTimer,
    budget: RetryBudget,
    state: ArbiterState,
    target: Option<StreamTarget>,
    low_latency: Option<LowLatencyBinding>,
    candidate: Option<LowLatencyBinding>,
    segmented: Option<SegmentedSession>,
    next_session: u64,
}

impl TransportArbiter {
    pub fn new(
        settings: ControllerSettings,
        surface: RenderSurface,
        connector: Arc<dyn LowLatencyConnector>,
        engine: Option<Arc<dyn SegmentedEngine>>,
        events: mpsc::UnboundedSender<ArbiterEvent>,
    ) -> Self {
        let publisher = StatusPublisher::new(settings.status_capacity);
        let budget = RetryBudget::new(settings.max_recovery_attempts);
        Self {
            id: Uuid::new_v4(),
            settings,
            surface,
            connector,
            engine,
            timer: RecoveryTimer::new(events.clone()),
            events,
            publisher,
            budget,
            state: ArbiterState::Idle,
            target: None,
            low_latency: None,
            candidate: None,
            segmented: None,
            next_session: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// 当前绑定到渲染面的传输
    pub fn active_transport(&self) -> Option<TransportKind> {
        if self.low_latency.as_ref().is_some_and(|b| b.lease.is_some()) {
            Some(TransportKind::LowLatency)
        } else if self.segmented.as_ref().is_some_and(|s| s.is_bound()) {
            Some(TransportKind::Segmented)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        ArbiterSnapshot {
            instance_id: self.id,
            stream_id: self.target.as_ref().map(|t| t.stream_id.clone()),
            state: self.state,
            active: self.active_transport(),
            retry_attempts: self.budget.attempts(),
            retry_ceiling: self.budget.ceiling(),
            recovery_pending: self.timer.is_armed(),
        }
    }

    /// 启动（或按新配置重启）
    ///
    /// 流ID、令牌或地址任一变化都会完整拆除并从 `PreferLowLatency` 重新开始；
    /// 配置未变且正在运行时不做任何事。
    pub fn start(&mut self, config: &StreamConfig) {
        let target = config.resolve();
        if self.state != ArbiterState::Idle && self.target.as_ref() == Some(&target) {
            debug!(instance = %self.id, stream = %target.stream_id, "Start with unchanged target ignored");
            return;
        }

        if self.state != ArbiterState::Idle {
            info!(
                instance = %self.id,
                stream = %target.stream_id,
                token = target.session_token,
                "Stream target changed, resetting"
            );
        }

        self.teardown_all();
        self.budget.reset();
        self.publisher.open();
        self.target = Some(target.clone());
        self.state = ArbiterState::PreferLowLatency;

        match (&target.low_latency_endpoint, &target.segmented_source_url) {
            (Some(endpoint), _) => self.bind_low_latency(endpoint),
            (None, Some(_)) => {
                info!(stream = %target.stream_id, "No low-latency endpoint, starting on segmented");
                self.fail_over_to_segmented();
            }
            (None, None) => {
                let err = PlayerError::NoTransportConfigured(target.stream_id.clone());
                error!(stream = %target.stream_id, "{}", err);
                self.state = ArbiterState::Failed;
                self.publisher.designate(TransportKind::LowLatency);
                self.publisher.publish(
                    TransportKind::LowLatency,
                    ConnectionStatus::Error,
                    Some(err.to_string()),
                );
            }
        }
    }

    /// 停止：释放所有传输资源，之后不再发布任何状态（幂等）
    pub fn stop(&mut self) {
        if self.state == ArbiterState::Idle && self.target.is_none() {
            return;
        }
        info!(instance = %self.id, "Stopping transport arbiter");
        self.teardown_all();
        self.publisher.close();
        self.target = None;
        self.state = ArbiterState::Idle;
    }

    pub fn handle_event(&mut self, event: ArbiterEvent) {
        match event {
            ArbiterEvent::LowLatency { session, report } => {
                if self.low_latency.as_ref().is_some_and(|b| b.id == session) {
                    self.on_low_latency_report(report);
                } else if self.candidate.as_ref().is_some_and(|b| b.id == session) {
                    self.on_candidate_report(report);
                } else {
                    debug!(session = %session, status = %report.status, "Report from retired low-latency session ignored");
                }
            }
            ArbiterEvent::Segmented { session, event } => {
                if self.segmented.as_ref().is_some_and(|s| s.id() == session) {
                    self.on_segmented_event(event);
                } else {
                    debug!(session = %session, "Event from retired segmented session ignored");
                }
            }
            ArbiterEvent::RecoveryDue { generation } => {
                if self.timer.accept(generation) {
                    self.on_recovery_due();
                }
            }
        }
    }

    fn next_session_id(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }

    fn bind_low_latency(&mut self, endpoint: &str) {
        let id = self.next_session_id();
        self.publisher.designate(TransportKind::LowLatency);

        let lease = match self.surface.bind(TransportKind::LowLatency, id) {
            Ok(lease) => lease,
            Err(e) => {
                error!(session = %id, "Failed to bind low-latency session: {}", e);
                self.publisher
                    .publish(TransportKind::LowLatency, ConnectionStatus::Error, Some(e.to_string()));
                return;
            }
        };

        info!(session = %id, endpoint, "Connecting low-latency session");
        let sink = StatusSink::new(id, self.events.clone());
        let session = self.connector.connect(endpoint, sink);
        let mut binding = LowLatencyBinding {
            id,
            session,
            lease: None,
            closed: false,
        };
        binding.attach(lease);
        self.low_latency = Some(binding);

        self.publisher
            .publish(TransportKind::LowLatency, ConnectionStatus::Connecting, None);
    }

    fn on_low_latency_report(&mut self, report: SessionReport) {
        if !report.status.is_error() {
            self.publisher
                .publish(TransportKind::LowLatency, report.status, report.error);
            return;
        }

        let reason = report.error.unwrap_or_else(|| "low-latency session failed".to_string());
        warn!(instance = %self.id, reason = %reason, "Low-latency transport failed");

        if let Some(mut binding) = self.low_latency.take() {
            binding.teardown();
        }

        let has_fallback = self.target.as_ref().is_some_and(|t| t.has_fallback());
        if has_fallback {
            self.publisher
                .publish(TransportKind::LowLatency, ConnectionStatus::Error, Some(reason));
            self.fail_over_to_segmented();
        } else {
            // 降级的 PreferLowLatency：没有可重试的对象
            self.state = ArbiterState::PreferLowLatency;
            self.publisher.publish(
                TransportKind::LowLatency,
                ConnectionStatus::Error,
                Some(format!("{}: {}", PlayerError::NoFallback, reason)),
            );
        }
    }

    fn fail_over_to_segmented(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let Some(url) = target.segmented_source_url.as_deref() else {
            return;
        };

        let id = self.next_session_id();
        self.publisher.designate(TransportKind::Segmented);
        let sink = EventSink::new(id, self.events.clone());

        match SegmentedSession::bind(
            self.engine.as_deref(),
            url,
            target.session_token,
            &self.surface,
            sink,
        ) {
            Ok(session) => {
                self.segmented = Some(session);
                self.state = ArbiterState::UsingSegmented;
                self.publisher
                    .publish(TransportKind::Segmented, ConnectionStatus::Connecting, None);
                if target.low_latency_endpoint.is_some() {
                    self.schedule_recovery();
                }
            }
            Err(PlayerError::Unsupported) => {
                error!(stream = %target.stream_id, "Segmented playback unsupported");
                self.state = ArbiterState::Failed;
                self.publisher.publish(
                    TransportKind::Segmented,
                    ConnectionStatus::Error,
                    Some(PlayerError::Unsupported.to_string()),
                );
            }
            Err(e) => {
                // 加载失败不是环境问题：有低延迟地址时继续恢复循环
                warn!(stream = %target.stream_id, "Segmented load failed: {}", e);
                self.publisher
                    .publish(TransportKind::Segmented, ConnectionStatus::Error, Some(e.to_string()));
                if target.low_latency_endpoint.is_some() {
                    self.state = ArbiterState::UsingSegmented;
                    self.schedule_recovery();
                } else {
                    self.state = ArbiterState::Failed;
                }
            }
        }
    }

    fn on_segmented_event(&mut self, event: SegmentedEvent) {
        let Some(session) = self.segmented.as_mut() else {
            return;
        };
        let Some(report) = session.handle_event(event) else {
            return;
        };

        if report.status.is_error() {
            // 已在分片上：原样上报，后台恢复继续
            warn!(
                state = ?self.state,
                reason = ?report.error,
                "Segmented transport error, recovery continues"
            );
        }
        self.publisher
            .publish(TransportKind::Segmented, report.status, report.error);
    }

    fn schedule_recovery(&mut self) {
        if !self.budget.try_consume() {
            info!(
                attempts = self.budget.attempts(),
                "Recovery attempts exhausted, staying on segmented"
            );
            return;
        }
        debug!(
            attempt = self.budget.attempts(),
            ceiling = self.budget.ceiling(),
            "Scheduling low-latency recovery attempt"
        );
        self.timer.arm(self.settings.recovery_delay);
    }

    fn on_recovery_due(&mut self) {
        if self.state != ArbiterState::UsingSegmented {
            debug!(state = ?self.state, "Recovery tick outside segmented state ignored");
            return;
        }
        let Some(endpoint) = self
            .target
            .as_ref()
            .and_then(|t| t.low_latency_endpoint.clone())
        else {
            return;
        };

        let id = self.next_session_id();
        info!(
            session = %id,
            attempt = self.budget.attempts(),
            "Attempting low-latency recovery"
        );

        // 候选会话先协商，不挂载，分片会话继续服务
        let sink = StatusSink::new(id, self.events.clone());
        let session = self.connector.connect(&endpoint, sink);
        self.candidate = Some(LowLatencyBinding {
            id,
            session,
            lease: None,
            closed: false,
        });
        self.state = ArbiterState::RecoveringToLowLatency;
    }

    fn on_candidate_report(&mut self, report: SessionReport) {
        match report.status {
            ConnectionStatus::Playing => self.promote_candidate(),
            ConnectionStatus::Error => {
                debug!(reason = ?report.error, "Recovery attempt failed");
                if let Some(mut candidate) = self.candidate.take() {
                    candidate.teardown();
                }
                if self.segmented.is_none() {
                    // 上次分片加载失败，重新绑定分片后再排下一次尝试
                    self.fail_over_to_segmented();
                } else {
                    self.state = ArbiterState::UsingSegmented;
                    self.schedule_recovery();
                }
            }
            status => {
                debug!(status = %status, "Recovery attempt in progress");
            }
        }
    }

    fn promote_candidate(&mut self) {
        let Some(mut candidate) = self.candidate.take() else {
            return;
        };

        // 先拆除分片，再绑定低延迟
        self.publisher.designate(TransportKind::LowLatency);
        if let Some(mut segmented) = self.segmented.take() {
            segmented.unbind();
        }

        match self.surface.bind(TransportKind::LowLatency, candidate.id) {
            Ok(lease) => {
                candidate.attach(lease);
                self.low_latency = Some(candidate);
                self.timer.cancel();
                self.budget.reset();
                self.state = ArbiterState::PreferLowLatency;
                info!(instance = %self.id, "Low-latency transport restored");
                self.publisher
                    .publish(TransportKind::LowLatency, ConnectionStatus::Playing, None);
            }
            Err(e) => {
                error!("Failed to promote low-latency session: {}", e);
                candidate.teardown();
                self.state = ArbiterState::Failed;
                self.publisher
                    .publish(TransportKind::LowLatency, ConnectionStatus::Error, Some(e.to_string()));
            }
        }
    }

    fn teardown_all(&mut self) {
        self.timer.cancel();
        if let Some(mut candidate) = self.candidate.take() {
            candidate.teardown();
        }
        if let Some(mut binding) = self.low_latency.take() {
            binding.teardown();
        }
        if let Some(mut segmented) = self.segmented.take() {
            segmented.unbind();
        }
    }
}

impl Drop for TransportArbiter {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
