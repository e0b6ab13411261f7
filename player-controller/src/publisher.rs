// 状态发布器
//
// 把当前绑定（或即将绑定）传输的状态转发给宿主，每次可观察变化只发布一次。
// 切换过程中外出传输产生的帧（例如拆除时的 idle）不会被发布。

use common::{ConnectionStatus, StatusUpdate, TransportKind};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

pub struct StatusPublisher {
    /// 逐次变化广播
    tx: broadcast::Sender<StatusUpdate>,
    /// 当前值快照
    current: watch::Sender<Option<StatusUpdate>>,
    /// 当前（或即将）绑定的传输
    designated: Option<TransportKind>,
    last: Option<StatusUpdate>,
    closed: bool,
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (current, _) = watch::channel(None);
        Self {
            tx,
            current,
            designated: None,
            last: None,
            closed: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StatusUpdate> {
        self.tx.clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<StatusUpdate>> {
        self.current.subscribe()
    }

    pub fn last(&self) -> Option<&StatusUpdate> {
        self.last.as_ref()
    }

    /// 开始接受发布；从关闭状态重新打开时不再与上一轮的状态去重
    pub fn open(&mut self) {
        if self.closed {
            self.last = None;
        }
        self.closed = false;
    }

    /// 停止发布，之后的所有帧都被丢弃
    pub fn close(&mut self) {
        self.closed = true;
        self.designated = None;
    }

    /// 标记当前（或即将）绑定的传输；其他传输的帧将被抑制
    pub fn designate(&mut self, kind: TransportKind) {
        if self.designated != Some(kind) {
            debug!(transport = %kind, "Status source designated");
        }
        self.designated = Some(kind);
    }

    pub fn designated(&self) -> Option<TransportKind> {
        self.designated
    }

    /// 发布状态，实际发出时返回 true
    pub fn publish(
        &mut self,
        transport: TransportKind,
        status: ConnectionStatus,
        error: Option<String>,
    ) -> bool {
        if self.closed {
            trace!(transport = %transport, status = %status, "Publisher closed, frame dropped");
            return false;
        }

        if self.designated != Some(transport) {
            trace!(
                transport = %transport,
                status = %status,
                "Frame from non-designated transport suppressed"
            );
            return false;
        }

        let update = StatusUpdate::new(transport, status, error);
        if let Some(last) = &self.last {
            if last.same_as(&update) {
                return false;
            }
        }

        debug!(status = %update, "Publishing status");

        // 没有订阅者时发送失败是正常情况
        let _ = self.tx.send(update.clone());
        self.current.send_replace(Some(update.clone()));
        self.last = Some(update);
        true
    }
}
