//! 进程内事件分发引擎（event-dispatch）
//!
//! 生产者投递强类型事件，单个有序的分发循环把事件路由到为其类型注册的处理管道：
//! - 事件与可确认事件（`event`），处理结果（`result`）
//! - 处理器（`handler`）、中间件（`middleware`）与按类型注册的管道（`registry`）
//! - 弹性：指数退避重试（`retry`）与熔断器（`circuit`）
//! - 指标（`metrics`）、死信（`dead_letter`）与序列化（`serializer`）
//! - 分发循环（`listener`）与宿主上下文（`host`）
//!
//! 本 crate 不涉及传输与队列持久化，也不提供 exactly-once 语义。
//!
//! 典型用法：
//! 1. 用 `#[event]` 宏（`event-dispatch-macros`）定义事件；
//! 2. 实现 `EventHandler<E>`，按需组合中间件；
//! 3. 构造 `DispatcherHost` 并注册处理器；
//! 4. 通过 `enqueue`（即发即弃）或 `enqueue_async`（等待结果）投递事件。
//!
pub mod circuit;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod handler;
pub mod host;
pub mod listener;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod result;
pub mod retry;
pub mod serializer;

pub use circuit::{CircuitBreaker, CircuitState};
pub use config::ListenerConfig;
pub use dead_letter::{DeadLetterEnvelope, DeadLetterSink, InMemoryDeadLetterQueue};
pub use error::{DispatchError, DispatchResult};
pub use event::{Completion, Confirmable, Event, EventMeta};
pub use handler::EventHandler;
pub use host::DispatcherHost;
pub use listener::EventListener;
pub use metrics::{EventMetrics, MetricsSnapshot};
pub use middleware::{EventMiddleware, LoggingMiddleware, Next, TimingMiddleware};
pub use registry::HandlerRegistry;
pub use result::HandlerResult;
pub use retry::RetryPolicy;
pub use serializer::{EventSerializer, EventTypeRegistry, JsonEventSerializer};

// `#[event]` 宏展开所需的依赖，用户 crate 无需直接依赖它们
#[doc(hidden)]
pub mod __private {
    pub use chrono;
    pub use serde;
    pub use serde_json;
    pub use uuid;
}
