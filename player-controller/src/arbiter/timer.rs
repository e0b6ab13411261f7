// 恢复定时器
//
// 每个仲裁器持有自己的定时器句柄，多个控制器之间互不影响。
// 到期事件带有代号，取消或重新布置后旧代号的事件一律作废。

use crate::transport::ArbiterEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Armed {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RecoveryTimer {
    events: mpsc::UnboundedSender<ArbiterEvent>,
    generation: u64,
    armed: Option<Armed>,
}

impl RecoveryTimer {
    pub fn new(events: mpsc::UnboundedSender<ArbiterEvent>) -> Self {
        Self {
            events,
            generation: 0,
            armed: None,
        }
    }

    /// 布置一次到期，会先取消已布置的定时器
    pub fn arm(&mut self, delay: Duration) -> u64 {
        self.cancel();

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(generation, "Recovery timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(ArbiterEvent::RecoveryDue { generation });
                }
            }
        });

        debug!(generation, delay_ms = delay.as_millis() as u64, "Recovery timer armed");
        self.armed = Some(Armed {
            generation,
            cancel,
            handle,
        });
        generation
    }

    /// 确认到期事件；只有当前布置的代号有效，确认后定时器解除
    pub fn accept(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => {
                debug!(generation, "Stale recovery tick ignored");
                false
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.cancel.cancel();
            armed.handle.abort();
            debug!(generation = armed.generation, "Recovery timer disarmed");
        }
    }
}

impl Drop for RecoveryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RecoveryTimer::new(tx);

        let start = tokio::time::Instant::now();
        let generation = timer.arm(Duration::from_secs(5));

        match rx.recv().await {
            Some(ArbiterEvent::RecoveryDue { generation: g }) => assert_eq!(g, generation),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(timer.accept(generation));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = RecoveryTimer::new(tx);

        timer.arm(Duration::from_secs(5));
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_previous_generation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = RecoveryTimer::new(tx);

        let first = timer.arm(Duration::from_secs(5));
        let second = timer.arm(Duration::from_secs(5));

        assert_ne!(first, second);
        assert!(!timer.accept(first));
        assert!(timer.accept(second));
    }
}
