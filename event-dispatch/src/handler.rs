//! 事件处理器（EventHandler）
//!
//! 处理某一具体事件类型的终端逻辑。返回 `Err` 等价于处理器“抛出异常”，
//! 分发循环会在调用边界捕获并转换为失败结果。
//!
use crate::{event::Event, result::HandlerResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// 事件处理器：处理类型为 `E` 的事件
#[async_trait]
pub trait EventHandler<E>: Send + Sync
where
    E: Event,
{
    /// 处理事件；长耗时的处理应观察 `token` 并配合取消
    async fn handle(&self, event: &E, token: &CancellationToken) -> anyhow::Result<HandlerResult>;

    /// 处理器名称（用于日志与审计）
    fn handler_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
