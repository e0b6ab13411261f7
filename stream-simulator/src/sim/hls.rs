// 模拟分片引擎
//
// 加载后经过启动耗时派发 loadeddata，可选地按固定周期制造欠载
// （waiting → playing）。前 N 次加载可配置为失败（播放列表不可达）。
// 销毁实例会终止派发任务。

use crate::config::SegmentedProfile;
use common::{MediaEvent, PlayerError, Result, TransportKind};
use player_controller::{EngineInstance, EventSink, RenderSurface, SegmentedEngine};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SimulatedEngine {
    profile: SegmentedProfile,
    loads: AtomicU32,
}

impl SimulatedEngine {
    pub fn new(profile: SegmentedProfile) -> Self {
        Self {
            profile,
            loads: AtomicU32::new(0),
        }
    }

    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::Relaxed)
    }
}

impl SegmentedEngine for SimulatedEngine {
    fn is_supported(&self) -> bool {
        self.profile.supported
    }

    fn load(
        &self,
        url: &str,
        surface: &RenderSurface,
        sink: EventSink,
    ) -> Result<Box<dyn EngineInstance>> {
        let attempt = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt <= self.profile.load_failures {
            warn!(url, attempt, "Simulated playlist fetch failed");
            return Err(PlayerError::Transport {
                kind: TransportKind::Segmented,
                message: "manifest unreachable".to_string(),
            });
        }

        info!(url, surface = surface.name(), "🎞️ Loading segmented playlist");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let profile = self.profile.clone();
        let surface = surface.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = play(profile, surface, sink) => {}
            }
        });

        Ok(Box::new(SimulatedInstance { cancel }))
    }
}

async fn play(profile: SegmentedProfile, surface: RenderSurface, sink: EventSink) {
    tokio::time::sleep(Duration::from_millis(profile.startup_ms)).await;
    surface.dispatch(MediaEvent::LoadedData);

    let Some(every) = profile.stall_every_ms else {
        return;
    };

    loop {
        tokio::time::sleep(Duration::from_millis(every)).await;
        debug!(session = %sink.session(), "Simulated buffer underrun");
        surface.dispatch(MediaEvent::Waiting);
        tokio::time::sleep(Duration::from_millis(profile.stall_ms)).await;
        surface.dispatch(MediaEvent::Playing);
    }
}

struct SimulatedInstance {
    cancel: CancellationToken,
}

impl EngineInstance for SimulatedInstance {
    fn destroy(&mut self) {
        self.cancel.cancel();
        debug!("Simulated engine destroyed");
    }
}
