//! 事件（Event）与确认槽（Completion）
//!
//! - `Event`：可被分发的事件需要满足的最小接口（唯一标识、创建时间、类型名、结构版本）；
//! - `EventMeta`：事件内嵌的身份信息块，构造时分配唯一 ID；
//! - `Completion`：一次性结果槽，只能被解析一次，可被任意多个等待者等待；
//! - `Confirmable`：携带 `Completion` 的可确认事件，生产者可等待其处理结果。
//!
//! 队列层面以带标签的 `Envelope` 区分“即发即弃”与“可确认”两种事件。
//!
use crate::result::HandlerResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// 运行时向下转型辅助
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 可分发事件的能力边界
///
/// 通常由 `#[event]` 宏生成实现；手写实现时 `to_json` 一般直接委托给 `serde_json::to_value`。
pub trait Event: AsAny + fmt::Debug + Send + Sync + 'static {
    /// 事件唯一标识（构造时分配，不可变）
    fn id(&self) -> Uuid;

    /// 事件创建时间
    fn created_at(&self) -> DateTime<Utc>;

    /// 稳定的事件类型名，默认取 Rust 类型全路径
    fn event_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// 事件结构版本
    fn schema_version(&self) -> u32 {
        1
    }

    /// 事件载荷的 JSON 表示（供序列化器与死信使用）
    fn to_json(&self) -> serde_json::Result<Value>;
}

impl dyn Event {
    /// 具体事件类型的 `TypeId`
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

/// 事件身份信息
///
/// `id` 只在 `new` 时分配。克隆出的事件沿用同一 `id`，视为同一个逻辑事件，
/// 共享重试计数与死信身份；需要独立身份时用 `EventMeta::new()` 重新构造。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    id: Uuid,
    created_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次性结果槽
///
/// - `resolve`：仅第一次调用生效，返回是否由本次调用完成解析；
/// - `wait`：等待结果，可被多个任务同时等待，解析后立即返回同一结果。
#[derive(Debug, Clone)]
pub struct Completion {
    slot: Arc<watch::Sender<Option<HandlerResult>>>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    pub fn resolve(&self, result: HandlerResult) -> bool {
        self.slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(result);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn try_result(&self) -> Option<HandlerResult> {
        self.slot.borrow().clone()
    }

    pub async fn wait(&self) -> HandlerResult {
        let mut rx = self.slot.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or_else(HandlerResult::cancelled),
            // 发送端由 self 持有，不会提前关闭
            Err(_) => HandlerResult::cancelled(),
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// 可确认事件：事件本体 + 一次性结果槽
#[derive(Debug)]
pub struct Confirmable<E: Event> {
    event: E,
    completion: Completion,
}

impl<E: Event> Confirmable<E> {
    pub fn new(event: E) -> Self {
        Self {
            event,
            completion: Completion::new(),
        }
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    /// 结果槽句柄（克隆共享同一个槽）
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn into_parts(self) -> (E, Completion) {
        (self.event, self.completion)
    }
}

/// 队列中的事件
#[derive(Debug)]
pub(crate) enum Envelope {
    Normal(Box<dyn Event>),
    Confirmable {
        event: Box<dyn Event>,
        completion: Completion,
    },
}

impl Envelope {
    pub(crate) fn event(&self) -> &dyn Event {
        match self {
            Self::Normal(event) => event.as_ref(),
            Self::Confirmable { event, .. } => event.as_ref(),
        }
    }

    pub(crate) fn is_confirmable(&self) -> bool {
        matches!(self, Self::Confirmable { .. })
    }

    /// 解析可确认事件的结果槽；普通事件无操作
    pub(crate) fn complete(&self, result: HandlerResult) {
        if let Self::Confirmable { completion, .. } = self {
            completion.resolve(result);
        }
    }
}
