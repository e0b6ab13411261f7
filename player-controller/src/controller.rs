// 流控制器
//
// 每个摄像头画面对应一个控制器任务。任务独占仲裁器，串行处理宿主命令与
// 传输事件；宿主通过 `ControllerHandle` 启停并订阅统一状态。

use crate::arbiter::{ArbiterSnapshot, TransportArbiter};
use crate::config::ControllerSettings;
use crate::surface::RenderSurface;
use crate::transport::{ArbiterEvent, LowLatencyConnector, SegmentedEngine};
use common::{PlayerError, Result, StatusUpdate, StreamConfig};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum Command {
    Start(StreamConfig),
    Stop,
    Inspect(oneshot::Sender<ArbiterSnapshot>),
    Shutdown,
}

pub struct StreamController {
    arbiter: TransportArbiter,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<ArbiterEvent>,
}

impl StreamController {
    /// 创建控制器并在当前运行时上启动其任务
    ///
    /// `engine` 为 `None` 时分片传输只能依赖渲染面的原生播放。
    pub fn spawn(
        surface: RenderSurface,
        connector: Arc<dyn LowLatencyConnector>,
        engine: Option<Arc<dyn SegmentedEngine>>,
        settings: ControllerSettings,
    ) -> ControllerHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let arbiter = TransportArbiter::new(settings, surface.clone(), connector, engine, event_tx);
        let id = arbiter.id();
        let status_tx = arbiter.publisher().sender();
        let current = arbiter.publisher().watch();

        let controller = StreamController {
            arbiter,
            commands: command_rx,
            events: event_rx,
        };
        let task = tokio::spawn(controller.run());

        info!(instance = %id, surface = surface.name(), "Stream controller started");

        ControllerHandle {
            id,
            commands: command_tx,
            status_tx,
            current,
            surface,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        loop {
            // 先排空传输事件，再接受下一条命令
            tokio::select! {
                biased;

                Some(event) = self.events.recv() => {
                    self.arbiter.handle_event(event);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Start(config)) => self.arbiter.start(&config),
                        Some(Command::Stop) => self.arbiter.stop(),
                        Some(Command::Inspect(reply)) => {
                            let _ = reply.send(self.arbiter.snapshot());
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
            }
        }

        self.arbiter.stop();
        info!(instance = %self.arbiter.id(), "Stream controller exited");
    }
}

/// 控制器句柄
///
/// 句柄被 drop 后任务会停止并释放所有传输资源。
pub struct ControllerHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status_tx: broadcast::Sender<StatusUpdate>,
    current: watch::Receiver<Option<StatusUpdate>>,
    surface: RenderSurface,
    task: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 开始播放（或切换到新的流/令牌）
    pub fn start(&self, config: StreamConfig) -> Result<()> {
        debug!(instance = %self.id, stream = %config.stream_id, "Start requested");
        self.send(Command::Start(config))
    }

    /// 停止播放（幂等）
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// 订阅之后发生的每一次状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    /// 当前统一状态
    pub fn status(&self) -> Option<StatusUpdate> {
        self.current.borrow().clone()
    }

    /// 当前状态的 watch 接收端
    pub fn watch(&self) -> watch::Receiver<Option<StatusUpdate>> {
        self.current.clone()
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// 发出状态查询，不等待结果
    pub fn inspect(&self) -> Result<oneshot::Receiver<ArbiterSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Inspect(tx))?;
        Ok(rx)
    }

    /// 查询仲裁器状态；在此之前排队的命令与事件都已处理完毕
    pub async fn snapshot(&self) -> Result<ArbiterSnapshot> {
        self.inspect()?
            .await
            .map_err(|_| PlayerError::ControllerStopped)
    }

    /// 关闭控制器任务并等待其退出
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(instance = %self.id, "Controller task ended abnormally: {}", e);
                return Err(PlayerError::ControllerStopped);
            }
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PlayerError::ControllerStopped)
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}
