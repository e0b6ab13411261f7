// 模拟低延迟协商器
//
// 每次协商在独立任务中推进：等待协商耗时后上报 connecting，
// 再根据剩余失败次数上报 error 或 playing。关闭后任务立即退出。

use crate::config::PeerProfile;
use player_controller::{LowLatencyConnector, LowLatencySession, RenderSurface, StatusSink};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SimulatedPeer {
    profile: PeerProfile,
    attempts: AtomicU32,
}

impl SimulatedPeer {
    pub fn new(profile: PeerProfile) -> Self {
        Self {
            profile,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl LowLatencyConnector for SimulatedPeer {
    fn connect(&self, endpoint: &str, sink: StatusSink) -> Box<dyn LowLatencySession> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let will_fail = attempt <= self.profile.failures_before_success;
        let cancel = CancellationToken::new();

        debug!(endpoint, attempt, session = %sink.session(), "Simulated negotiation started");

        let token = cancel.clone();
        let profile = self.profile.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = negotiate(profile, endpoint, will_fail, sink) => {}
            }
        });

        Box::new(SimulatedSession {
            cancel,
            attached: false,
        })
    }
}

async fn negotiate(profile: PeerProfile, endpoint: String, will_fail: bool, sink: StatusSink) {
    sink.connecting();
    tokio::time::sleep(Duration::from_millis(profile.connect_delay_ms)).await;

    if will_fail {
        info!(endpoint = %endpoint, "📡 Simulated ICE failure");
        sink.error("ice connection failed");
        return;
    }

    sink.playing();

    if let Some(ms) = profile.drop_after_ms {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        info!(endpoint = %endpoint, "📡 Simulated peer connection lost");
        sink.error("peer connection lost");
    }
}

struct SimulatedSession {
    cancel: CancellationToken,
    attached: bool,
}

impl LowLatencySession for SimulatedSession {
    fn attach(&mut self, surface: &RenderSurface) {
        self.attached = true;
        debug!(surface = surface.name(), "Simulated peer media attached");
    }

    fn close(&mut self) {
        self.cancel.cancel();
        debug!(attached = self.attached, "Simulated peer session closed");
    }
}
