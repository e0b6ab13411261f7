// 低延迟传输会话接口
//
// 点对点协商器不在本库实现，这里只定义仲裁器依赖的能力：
// 给定信令地址开始协商，并通过 `StatusSink` 回报
// `idle|connecting|playing|stalled|error`；放弃时必须上报 `error`。

use super::StatusSink;
use crate::surface::RenderSurface;

/// 已发起协商的低延迟会话
pub trait LowLatencySession: Send {
    /// 将协商得到的媒体挂载到渲染面
    ///
    /// 首选路径在连接后立即挂载；恢复路径只在会话证明健康后才挂载。
    fn attach(&mut self, surface: &RenderSurface);

    /// 关闭会话并释放原生资源，之后不得再回报状态
    fn close(&mut self);
}

/// 低延迟会话协商器
pub trait LowLatencyConnector: Send + Sync {
    fn connect(&self, endpoint: &str, sink: StatusSink) -> Box<dyn LowLatencySession>;
}
