//! 分发监听器（EventListener）
//!
//! 单消费者的分发循环：
//! - 两条无界队列：可确认事件走优先队列，即发即弃事件走普通队列；
//! - 每轮严格优先取优先队列，队列内 FIFO；
//! - 一个事件的全部管道顺序执行，整体经过熔断器，单条管道受 `handler_timeout` 约束；
//! - 失败按指数退避重试（退避期间循环挂起），耗尽后转入死信。
//!
//! ```text
//! enqueue ───────────► normal   ─┐
//!                                ├─► loop ─► breaker ─► pipelines ─┬─► 成功：processed / 完成
//! enqueue_confirmable ► priority ─┘                                 └─► 失败：retry ─► 重新入队
//!                                                                              └─► 死信 / 完成
//! ```
//!
//! 关闭时（`stop` 或最后一个句柄被释放），仍在队列中与正在处理的可确认事件
//! 统一以“已取消”结果完成。
//!
use crate::{
    circuit::CircuitBreaker,
    config::ListenerConfig,
    dead_letter::{DeadLetterEnvelope, DeadLetterSink, InMemoryDeadLetterQueue},
    error::{DispatchError, DispatchResult, panic_reason},
    event::{Completion, Confirmable, Envelope, Event},
    metrics::EventMetrics,
    registry::{HandlerRegistry, Pipeline},
    result::HandlerResult,
    retry::{RetryDecision, RetryPolicy, RetryTracker},
    serializer::{EventSerializer, JsonEventSerializer},
};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 重试耗尽时写入死信的原因
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// 无处理器时的失败消息
pub const NO_HANDLERS_FOUND: &str = "no handlers found";

// 循环与句柄共享的只读组件与计数
struct Shared {
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<dyn DeadLetterSink>,
    serializer: Arc<dyn EventSerializer>,
    config: ListenerConfig,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    metrics: EventMetrics,
    retries: RetryTracker,
}

struct Inner {
    shared: Arc<Shared>,
    priority_tx: UnboundedSender<Envelope>,
    normal_tx: UnboundedSender<Envelope>,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// 分发监听器句柄
///
/// 克隆开销很小，所有克隆共享同一个分发循环；最后一个句柄释放时循环被取消。
#[derive(Clone)]
pub struct EventListener {
    inner: Arc<Inner>,
}

#[bon::bon]
impl EventListener {
    /// 构造并立即在当前 tokio 运行时上启动分发循环
    ///
    /// 未指定时，死信存储为容量 1000 的 `InMemoryDeadLetterQueue`，序列化器为 `JsonEventSerializer`。
    #[builder(finish_fn = start)]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
        serializer: Option<Arc<dyn EventSerializer>>,
        #[builder(default)] config: ListenerConfig,
    ) -> Self {
        let dead_letters =
            dead_letters.unwrap_or_else(|| Arc::new(InMemoryDeadLetterQueue::default()));
        let serializer = serializer.unwrap_or_else(|| Arc::new(JsonEventSerializer::new()));

        let shared = Arc::new(Shared {
            registry,
            dead_letters,
            serializer,
            config,
            policy: config.retry_policy(),
            breaker: config.circuit_breaker(),
            metrics: EventMetrics::new(),
            retries: RetryTracker::new(),
        });

        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let worker = DispatchLoop {
            shared: shared.clone(),
            priority_rx,
            normal_rx,
            priority_tx: priority_tx.clone(),
            normal_tx: normal_tx.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        tracing::debug!(
            max_retries = config.max_retries,
            breaker_threshold = config.circuit_breaker_failure_threshold,
            "event listener started"
        );

        Self {
            inner: Arc::new(Inner {
                shared,
                priority_tx,
                normal_tx,
                token,
                worker: Mutex::new(Some(handle)),
            }),
        }
    }
}

impl EventListener {
    /// 投递即发即弃事件，不阻塞
    ///
    /// 监听器已停止时返回 `DispatchError::Cancelled`。
    pub fn enqueue<E: Event>(&self, event: E) -> DispatchResult<()> {
        self.enqueue_boxed(Box::new(event))
    }

    pub fn enqueue_boxed(&self, event: Box<dyn Event>) -> DispatchResult<()> {
        if self.inner.token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        self.inner
            .normal_tx
            .send(Envelope::Normal(event))
            .map_err(|_| DispatchError::Cancelled)
    }

    /// 投递可确认事件，返回其结果槽
    ///
    /// 监听器已停止时结果槽立即以“已取消”完成。
    pub fn enqueue_confirmable<E: Event>(&self, confirmable: Confirmable<E>) -> Completion {
        let (event, completion) = confirmable.into_parts();
        let envelope = Envelope::Confirmable {
            event: Box::new(event),
            completion: completion.clone(),
        };

        if self.inner.token.is_cancelled() {
            envelope.complete(HandlerResult::cancelled());
        } else if let Err(rejected) = self.inner.priority_tx.send(envelope) {
            rejected.0.complete(HandlerResult::cancelled());
        }
        completion
    }

    /// 投递事件并等待处理结果
    ///
    /// 调用方取消或监听器关闭时返回“已取消”结果；取消不会把已入队的事件撤回。
    pub async fn enqueue_async<E: Event>(
        &self,
        event: E,
        token: &CancellationToken,
    ) -> HandlerResult {
        let completion = self.enqueue_confirmable(Confirmable::new(event));

        tokio::select! {
            biased;
            result = completion.wait() => result,
            _ = token.cancelled() => HandlerResult::cancelled(),
            _ = self.inner.token.cancelled() => completion
                .try_result()
                .unwrap_or_else(HandlerResult::cancelled),
        }
    }

    /// 请求停止：取消等待与退避
    pub fn stop(&self) {
        self.inner.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// 等待分发循环退出（需先 `stop`）；重复调用直接返回
    pub async fn join(&self) {
        let Some(worker) = self.inner.worker.lock().take() else {
            return;
        };
        if let Err(err) = worker.await {
            tracing::error!(error = %err, "event listener task failed");
        }
    }

    pub fn metrics(&self) -> &EventMetrics {
        &self.inner.shared.metrics
    }

    /// 事件当前已重试次数
    pub fn retry_attempts(&self, event_id: Uuid) -> u32 {
        self.inner.shared.retries.attempts(event_id)
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.shared.breaker
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.shared.registry
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.inner.shared.config
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("running", &self.is_running())
            .field("config", &self.inner.shared.config)
            .field("metrics", &self.inner.shared.metrics.snapshot())
            .finish()
    }
}

// 单条事件处理后的走向
enum Flow {
    Continue,
    Stop,
}

struct DispatchLoop {
    shared: Arc<Shared>,
    priority_rx: UnboundedReceiver<Envelope>,
    normal_rx: UnboundedReceiver<Envelope>,
    priority_tx: UnboundedSender<Envelope>,
    normal_tx: UnboundedSender<Envelope>,
    token: CancellationToken,
}

impl DispatchLoop {
    async fn run(mut self) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(envelope) = self.priority_rx.recv() => envelope,
                Some(envelope) = self.normal_rx.recv() => envelope,
            };

            if let Flow::Stop = self.dispatch(envelope).await {
                break;
            }
        }

        self.drain();
        tracing::debug!("event listener stopped");
    }

    async fn dispatch(&self, envelope: Envelope) -> Flow {
        let event = envelope.event();
        let event_id = event.id();
        let pipelines = self.shared.registry.pipelines_for_event(event);

        if pipelines.is_empty() {
            tracing::warn!(
                event_id = %event_id,
                event_type = event.event_type(),
                "no handlers found, event discarded"
            );
            envelope.complete(HandlerResult::failure(
                NO_HANDLERS_FOUND,
                Some(DispatchError::NoHandlers {
                    event_type: event.event_type().to_string(),
                }),
                None,
            ));
            return Flow::Continue;
        }

        let result = self
            .shared
            .breaker
            .execute(|| self.invoke_all(event, &pipelines))
            .await;

        if result.is_success() {
            self.shared.metrics.incr_processed();
            self.shared.retries.clear(event_id);
            envelope.complete(result);
            return Flow::Continue;
        }

        if self.token.is_cancelled() {
            envelope.complete(HandlerResult::cancelled());
            return Flow::Stop;
        }

        self.shared.metrics.incr_failed();

        match self.shared.policy.decide(self.shared.retries.attempts(event_id)) {
            RetryDecision::Retry { attempt, delay } => {
                self.shared.retries.record(event_id, attempt);
                tracing::info!(
                    event_id = %event_id,
                    event_type = event.event_type(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    message = result.message().unwrap_or_default(),
                    "event failed, scheduling retry"
                );

                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => {
                        self.shared.retries.clear(event_id);
                        envelope.complete(HandlerResult::cancelled());
                        return Flow::Stop;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                self.requeue(envelope);
                self.shared.metrics.incr_retried();
            }
            RetryDecision::Exhausted { attempts } => {
                self.shared.metrics.incr_dropped();
                self.shared.retries.clear(event_id);
                tracing::warn!(
                    event_id = %event_id,
                    event_type = event.event_type(),
                    attempts,
                    "retries exhausted, moving event to dead letters"
                );

                self.dead_letter(event).await;
                envelope.complete(result.with_entry("retries", attempts));
            }
        }

        Flow::Continue
    }

    // 全部管道顺序执行；返回第一个失败结果，全部成功时返回最后一个结果
    async fn invoke_all(
        &self,
        event: &dyn Event,
        pipelines: &[Pipeline],
    ) -> anyhow::Result<HandlerResult> {
        let mut first_failure: Option<HandlerResult> = None;
        let mut last = HandlerResult::ok();

        for pipeline in pipelines {
            let outcome = self.invoke_one(event, pipeline).await;
            if !outcome.is_success() && first_failure.is_none() {
                first_failure = Some(outcome);
            } else {
                last = outcome;
            }
        }

        Ok(first_failure.unwrap_or(last))
    }

    async fn invoke_one(&self, event: &dyn Event, pipeline: &Pipeline) -> HandlerResult {
        let timeout = self.shared.config.handler_timeout;
        let guarded = AssertUnwindSafe(pipeline.invoke(event, &self.token)).catch_unwind();

        let result = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(err))) => HandlerResult::from_error(DispatchError::from(err)),
            Ok(Err(payload)) => HandlerResult::from_error(DispatchError::HandlerPanicked {
                reason: panic_reason(payload.as_ref()),
            }),
            Err(_) => HandlerResult::from_error(DispatchError::HandlerTimeout {
                timeout_ms: timeout.as_millis(),
            }),
        };

        if !result.is_success() {
            tracing::debug!(
                event_id = %event.id(),
                handler = pipeline.handler_name(),
                message = result.message().unwrap_or_default(),
                "pipeline failed"
            );
        }
        result
    }

    // 可确认事件回到优先队列，其余回到普通队列
    fn requeue(&self, envelope: Envelope) {
        let queue = if envelope.is_confirmable() {
            &self.priority_tx
        } else {
            &self.normal_tx
        };
        if let Err(rejected) = queue.send(envelope) {
            rejected.0.complete(HandlerResult::cancelled());
        }
    }

    async fn dead_letter(&self, event: &dyn Event) {
        let envelope = match DeadLetterEnvelope::create(event, self.shared.serializer.as_ref()) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(event_id = %event.id(), error = %err, "failed to build dead letter");
                return;
            }
        };

        if let Err(err) = self
            .shared
            .dead_letters
            .save(envelope, MAX_RETRIES_EXCEEDED)
            .await
        {
            tracing::error!(event_id = %event.id(), error = %err, "failed to save dead letter");
        }
    }

    // 关闭队列后取出剩余事件，可确认事件以“已取消”完成
    fn drain(&mut self) {
        self.priority_rx.close();
        self.normal_rx.close();

        let mut discarded = 0_usize;
        for rx in [&mut self.priority_rx, &mut self.normal_rx] {
            while let Ok(envelope) = rx.try_recv() {
                envelope.complete(HandlerResult::cancelled());
                discarded += 1;
            }
        }

        if discarded > 0 {
            tracing::info!(discarded, "pending events cancelled on shutdown");
        }
    }
}
