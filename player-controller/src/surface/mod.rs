// 渲染面适配器
//
// 渲染面是唯一的共享可变资源：同一时刻最多绑定一个传输。
// 绑定通过 `SurfaceLease` 表示，监听器通过 `ListenerGuard` 表示，
// 两者都在 drop 时自动释放，保证任何退出路径都不会泄漏。

use crate::transport::{EventSink, SessionId};
use common::{MediaEvent, PlayerError, Result, TransportKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// 审计日志只保留最近的记录
pub const AUDIT_CAPACITY: usize = 64;

/// 绑定审计记录，用于检查"最多一个绑定"不变式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceAudit {
    Bound { kind: TransportKind, session: SessionId },
    Unbound { kind: TransportKind, session: SessionId },
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    kind: TransportKind,
    session: SessionId,
}

struct SurfaceInner {
    binding: Option<Binding>,
    source: Option<String>,
    native_playback: bool,
    listeners: Vec<(u64, EventSink)>,
    next_listener_id: u64,
    audit: VecDeque<SurfaceAudit>,
}

impl SurfaceInner {
    fn record(&mut self, entry: SurfaceAudit) {
        if self.audit.len() == AUDIT_CAPACITY {
            self.audit.pop_front();
        }
        self.audit.push_back(entry);
    }
}

/// 可播放的媒体输出（视频元素）
#[derive(Clone)]
pub struct RenderSurface {
    name: Arc<str>,
    inner: Arc<Mutex<SurfaceInner>>,
}

impl RenderSurface {
    pub fn new(name: &str) -> Self {
        Self::build(name, false)
    }

    /// 创建支持原生分片播放的渲染面（无需分片引擎）
    pub fn with_native_playback(name: &str) -> Self {
        Self::build(name, true)
    }

    fn build(name: &str, native_playback: bool) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(SurfaceInner {
                binding: None,
                source: None,
                native_playback,
                listeners: Vec::new(),
                next_listener_id: 0,
                audit: VecDeque::with_capacity(AUDIT_CAPACITY),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 将渲染面绑定到指定传输
    ///
    /// 已被占用时返回 `SurfaceBusy`，调用方必须先释放旧绑定。
    pub fn bind(&self, kind: TransportKind, session: SessionId) -> Result<SurfaceLease> {
        let mut inner = self.inner.lock();
        let current = inner.binding;
        if let Some(existing) = current {
            warn!(
                surface = %self.name,
                bound = %existing.kind,
                requested = %kind,
                "Render surface already bound"
            );
            return Err(PlayerError::SurfaceBusy(existing.kind));
        }

        inner.binding = Some(Binding { kind, session });
        inner.record(SurfaceAudit::Bound { kind, session });
        debug!(surface = %self.name, transport = %kind, session = %session, "Surface bound");

        Ok(SurfaceLease {
            surface: self.clone(),
            kind,
            session,
            released: false,
        })
    }

    fn release(&self, kind: TransportKind, session: SessionId) {
        let mut inner = self.inner.lock();
        let current = inner.binding;
        match current {
            Some(b) if b.session == session => {
                inner.binding = None;
                inner.record(SurfaceAudit::Unbound { kind, session });
                debug!(surface = %self.name, transport = %kind, session = %session, "Surface unbound");
            }
            _ => {
                debug!(surface = %self.name, session = %session, "Stale surface release ignored");
            }
        }
    }

    pub fn bound_kind(&self) -> Option<TransportKind> {
        self.inner.lock().binding.map(|b| b.kind)
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().binding.is_some()
    }

    pub fn supports_native_playback(&self) -> bool {
        self.inner.lock().native_playback
    }

    /// 设置原生播放源
    pub fn set_source(&self, url: &str) {
        self.inner.lock().source = Some(url.to_string());
    }

    /// 卸下原生播放源，停止其网络请求
    pub fn clear_source(&self) {
        self.inner.lock().source = None;
    }

    pub fn source(&self) -> Option<String> {
        self.inner.lock().source.clone()
    }

    /// 注册媒体事件监听器
    pub fn add_listener(&self, sink: EventSink) -> ListenerGuard {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, sink));

        ListenerGuard {
            surface: self.clone(),
            id,
            removed: false,
        }
    }

    fn remove_listener(&self, id: u64) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// 派发媒体事件给所有监听器，返回送达数量
    pub fn dispatch(&self, event: MediaEvent) -> usize {
        // 先复制出监听器，避免持锁回调
        let listeners: Vec<EventSink> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();

        listeners
            .iter()
            .filter(|sink| sink.media(event.clone()))
            .count()
    }

    /// 最近的绑定/解绑记录（最多 `AUDIT_CAPACITY` 条，按时间顺序）
    pub fn audit_log(&self) -> Vec<SurfaceAudit> {
        self.inner.lock().audit.iter().copied().collect()
    }
}

impl std::fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("name", &self.name)
            .field("bound", &self.bound_kind())
            .finish()
    }
}

/// 渲染面绑定凭据，drop 时释放
pub struct SurfaceLease {
    surface: RenderSurface,
    kind: TransportKind,
    session: SessionId,
    released: bool,
}

impl SurfaceLease {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// 释放绑定（幂等）
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.surface.release(self.kind, self.session);
        true
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// 监听器注册凭据，drop 时注销
pub struct ListenerGuard {
    surface: RenderSurface,
    id: u64,
    removed: bool,
}

impl ListenerGuard {
    pub fn remove(&mut self) -> bool {
        if self.removed {
            return false;
        }
        self.removed = true;
        self.surface.remove_listener(self.id);
        true
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

/// 检查审计日志中任意时刻的绑定数不超过 1
pub fn max_concurrent_bindings(log: &[SurfaceAudit]) -> usize {
    let mut current = 0usize;
    let mut peak = 0usize;
    for entry in log {
        match entry {
            SurfaceAudit::Bound { .. } => {
                current += 1;
                peak = peak.max(current);
            }
            SurfaceAudit::Unbound { .. } => current = current.saturating_sub(1),
        }
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_second_bind_rejected() {
        let surface = RenderSurface::new("cam-1");
        let _lease = surface.bind(TransportKind::LowLatency, SessionId(1)).unwrap();

        let err = surface
            .bind(TransportKind::Segmented, SessionId(2))
            .err()
            .unwrap();
        assert_eq!(err, PlayerError::SurfaceBusy(TransportKind::LowLatency));
    }

    #[test]
    fn test_lease_release_is_idempotent() {
        let surface = RenderSurface::new("cam-1");
        let mut lease = surface.bind(TransportKind::Segmented, SessionId(1)).unwrap();

        assert!(lease.release());
        assert!(!lease.release());
        drop(lease);

        let log = surface.audit_log();
        assert_eq!(log.len(), 2);
        assert!(!surface.is_bound());
    }

    #[test]
    fn test_drop_releases_binding() {
        let surface = RenderSurface::new("cam-1");
        {
            let _lease = surface.bind(TransportKind::LowLatency, SessionId(7)).unwrap();
            assert_eq!(surface.bound_kind(), Some(TransportKind::LowLatency));
        }
        assert!(surface.bind(TransportKind::Segmented, SessionId(8)).is_ok());
        assert_eq!(max_concurrent_bindings(&surface.audit_log()), 1);
    }

    #[test]
    fn test_audit_log_keeps_only_recent_entries() {
        let surface = RenderSurface::new("cam-1");
        for n in 0..10_000u64 {
            let kind = if n % 2 == 0 {
                TransportKind::LowLatency
            } else {
                TransportKind::Segmented
            };
            let _lease = surface.bind(kind, SessionId(n)).unwrap();
        }

        let log = surface.audit_log();
        assert_eq!(log.len(), AUDIT_CAPACITY);
        assert_eq!(
            log.last(),
            Some(&SurfaceAudit::Unbound {
                kind: TransportKind::Segmented,
                session: SessionId(9_999)
            })
        );
        assert_eq!(max_concurrent_bindings(&log), 1);
        assert!(!surface.is_bound());
    }

    #[test]
    fn test_listener_guard_unregisters() {
        let surface = RenderSurface::new("cam-1");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let guard = surface.add_listener(EventSink::new(SessionId(3), tx));
        assert_eq!(surface.dispatch(MediaEvent::Playing), 1);
        assert!(rx.try_recv().is_ok());

        drop(guard);
        assert_eq!(surface.listener_count(), 0);
        assert_eq!(surface.dispatch(MediaEvent::Playing), 0);
    }

    #[test]
    fn test_max_concurrent_bindings_detects_overlap() {
        let log = vec![
            SurfaceAudit::Bound { kind: TransportKind::LowLatency, session: SessionId(1) },
            SurfaceAudit::Bound { kind: TransportKind::Segmented, session: SessionId(2) },
        ];
        assert_eq!(max_concurrent_bindings(&log), 2);
    }
}
