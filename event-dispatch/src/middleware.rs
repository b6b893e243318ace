//! 中间件（EventMiddleware）
//!
//! 中间件包裹在处理器之外，按注册顺序由外到内执行：
//!
//! ```text
//! m1 ──► m2 ──► ... ──► mN ──► handler
//! m1 ◄── m2 ◄── ... ◄── mN ◄── result
//! ```
//!
//! 每个中间件可以：
//! - 调用 `next.run()` 继续执行剩余链路；
//! - 不调用 `next` 直接返回（短路）；
//! - 改写 `next` 返回的结果，或直接返回错误。
//!
use crate::{event::Event, result::HandlerResult};
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 管道调用返回的 Future
pub type PipelineFuture<'a> = BoxFuture<'a, anyhow::Result<HandlerResult>>;

/// 组合后的管道函数（中间件链 + 终端处理器）
pub(crate) type PipelineFn = Arc<
    dyn for<'a> Fn(&'a dyn Event, &'a CancellationToken) -> PipelineFuture<'a> + Send + Sync,
>;

/// 将闭包约束为管道函数签名
pub(crate) fn pipeline_fn<F>(f: F) -> PipelineFn
where
    F: for<'a> Fn(&'a dyn Event, &'a CancellationToken) -> PipelineFuture<'a>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// 链路中剩余部分的调用入口
pub struct Next<'a> {
    chain: &'a PipelineFn,
    event: &'a dyn Event,
    token: &'a CancellationToken,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a PipelineFn,
        event: &'a dyn Event,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            chain,
            event,
            token,
        }
    }

    /// 执行剩余链路
    pub fn run(self) -> PipelineFuture<'a> {
        (self.chain)(self.event, self.token)
    }
}

/// 事件中间件
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// 中间件名称（用于日志）
    fn name(&self) -> &'static str;

    async fn invoke(
        &self,
        event: &dyn Event,
        token: &CancellationToken,
        next: Next<'_>,
    ) -> anyhow::Result<HandlerResult>;
}

/// 以 tracing 记录每次调用的进入与结果
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl EventMiddleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn invoke(
        &self,
        event: &dyn Event,
        _token: &CancellationToken,
        next: Next<'_>,
    ) -> anyhow::Result<HandlerResult> {
        tracing::info!(
            event_id = %event.id(),
            event_type = event.event_type(),
            "handling event"
        );

        let outcome = next.run().await;
        match &outcome {
            Ok(result) if result.is_success() => {
                tracing::info!(event_id = %event.id(), "handler succeeded");
            }
            Ok(result) => {
                tracing::warn!(
                    event_id = %event.id(),
                    message = result.message().unwrap_or_default(),
                    "handler failed"
                );
            }
            Err(err) => {
                tracing::warn!(event_id = %event.id(), error = %err, "handler raised an error");
            }
        }
        outcome
    }
}

/// 在结果元数据中追加 `elapsed_ms`
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingMiddleware;

#[async_trait]
impl EventMiddleware for TimingMiddleware {
    fn name(&self) -> &'static str {
        "timing"
    }

    async fn invoke(
        &self,
        _event: &dyn Event,
        _token: &CancellationToken,
        next: Next<'_>,
    ) -> anyhow::Result<HandlerResult> {
        let started = Instant::now();
        let result = next.run().await?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(result.with_entry("elapsed_ms", elapsed_ms))
    }
}
