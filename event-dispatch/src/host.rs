//! 分发宿主（DispatcherHost）
//!
//! 进程内一次性构造的上下文对象，持有处理器注册表、事件类型注册表、序列化器、
//! 死信存储与运行中的监听器。生产者显式持有宿主（或监听器克隆），不存在全局单例。
//!
use crate::{
    config::ListenerConfig,
    dead_letter::{DeadLetterEnvelope, DeadLetterSink, InMemoryDeadLetterQueue},
    error::DispatchResult,
    event::{Completion, Confirmable, Event},
    handler::EventHandler,
    listener::EventListener,
    metrics::EventMetrics,
    middleware::EventMiddleware,
    registry::HandlerRegistry,
    result::HandlerResult,
    serializer::{EventSerializer, EventTypeRegistry, JsonEventSerializer},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DispatcherHost {
    registry: Arc<HandlerRegistry>,
    types: Arc<EventTypeRegistry>,
    serializer: Arc<dyn EventSerializer>,
    dead_letters: Arc<dyn DeadLetterSink>,
    listener: EventListener,
}

#[bon::bon]
impl DispatcherHost {
    /// 构造宿主并启动监听器
    ///
    /// 默认使用 `JsonEventSerializer`（共享 `types`）与容量 1000 的内存死信队列。
    /// 传入自定义序列化器时，`register` 仍会把类型记入 `types`，是否使用由序列化器自行决定。
    #[builder]
    pub fn new(
        #[builder(default)] config: ListenerConfig,
        types: Option<Arc<EventTypeRegistry>>,
        serializer: Option<Arc<dyn EventSerializer>>,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
    ) -> Self {
        let types = types.unwrap_or_default();
        let serializer = serializer
            .unwrap_or_else(|| Arc::new(JsonEventSerializer::with_registry(types.clone())));
        let dead_letters =
            dead_letters.unwrap_or_else(|| Arc::new(InMemoryDeadLetterQueue::default()));
        let registry = Arc::new(HandlerRegistry::new());

        let listener = EventListener::builder()
            .registry(registry.clone())
            .dead_letters(dead_letters.clone())
            .serializer(serializer.clone())
            .config(config)
            .start();

        Self {
            registry,
            types,
            serializer,
            dead_letters,
            listener,
        }
    }
}

impl DispatcherHost {
    /// 注册处理器，并把事件类型记入类型注册表以便恢复死信
    pub fn register<E, H>(
        &self,
        handler: Arc<H>,
        middlewares: Vec<Arc<dyn EventMiddleware>>,
    ) -> &Self
    where
        E: Event + DeserializeOwned,
        H: EventHandler<E> + 'static,
    {
        self.types.register::<E>();
        self.registry.register::<E, H>(handler, middlewares);
        self
    }

    pub fn enqueue<E: Event>(&self, event: E) -> DispatchResult<()> {
        self.listener.enqueue(event)
    }

    pub fn enqueue_confirmable<E: Event>(&self, confirmable: Confirmable<E>) -> Completion {
        self.listener.enqueue_confirmable(confirmable)
    }

    pub async fn enqueue_async<E: Event>(
        &self,
        event: E,
        token: &CancellationToken,
    ) -> HandlerResult {
        self.listener.enqueue_async(event, token).await
    }

    pub async fn dead_letters(&self) -> DispatchResult<Vec<DeadLetterEnvelope>> {
        self.dead_letters.list_failed().await
    }

    /// 将死信还原为事件对象
    pub fn restore(&self, envelope: &DeadLetterEnvelope) -> DispatchResult<Box<dyn Event>> {
        envelope.restore(self.serializer.as_ref())
    }

    /// 还原全部死信并重新投递，返回成功投递的数量
    ///
    /// 死信存储本身不变；无法还原的条目仅记录日志。
    pub async fn redeliver_dead_letters(&self) -> DispatchResult<usize> {
        let mut delivered = 0;
        for envelope in self.dead_letters.list_failed().await? {
            match self.restore(&envelope) {
                Ok(event) => {
                    self.listener.enqueue_boxed(event)?;
                    delivered += 1;
                }
                Err(err) => tracing::warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %err,
                    "dead letter could not be restored"
                ),
            }
        }
        Ok(delivered)
    }

    pub fn listener(&self) -> &EventListener {
        &self.listener
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn types(&self) -> &Arc<EventTypeRegistry> {
        &self.types
    }

    pub fn serializer(&self) -> &Arc<dyn EventSerializer> {
        &self.serializer
    }

    pub fn metrics(&self) -> &EventMetrics {
        self.listener.metrics()
    }

    /// 停止监听器并等待其退出
    pub async fn shutdown(&self) {
        self.listener.stop();
        self.listener.join().await;
    }
}
