//! 事件序列化
//!
//! 分发核心只调用 `serialize`（构造死信时）；`deserialize` 供死信恢复工具使用。
//! 多态反序列化依赖 `EventTypeRegistry`：类型名 → 反序列化工厂。
//!
use crate::{
    error::{DispatchError, DispatchResult},
    event::Event,
};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::any::{TypeId, type_name};
use std::sync::Arc;

/// 事件序列化器
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &dyn Event) -> DispatchResult<String>;

    /// 按类型名还原事件
    fn deserialize(&self, payload: &str, type_hint: &str) -> DispatchResult<Box<dyn Event>>;

    /// 写入死信信封的类型名
    fn type_name(&self, event: &dyn Event) -> String {
        event.event_type().to_string()
    }
}

type EventFactory = Arc<dyn Fn(&str) -> DispatchResult<Box<dyn Event>> + Send + Sync>;

/// 事件类型注册表（名称 ↔ 类型）
///
/// 同一名称或同一类型只记录第一次注册。
#[derive(Default)]
pub struct EventTypeRegistry {
    factories: DashMap<String, EventFactory>,
    names: DashMap<TypeId, String>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 Rust 类型全路径注册
    pub fn register<E>(&self) -> &Self
    where
        E: Event + DeserializeOwned,
    {
        self.register_as::<E>(type_name::<E>())
    }

    /// 以自定义名称注册
    pub fn register_as<E>(&self, name: impl Into<String>) -> &Self
    where
        E: Event + DeserializeOwned,
    {
        let name = name.into();
        let factory: EventFactory = Arc::new(|payload: &str| {
            let event: E = serde_json::from_str(payload)?;
            Ok(Box::new(event) as Box<dyn Event>)
        });

        self.factories.entry(name.clone()).or_insert(factory);
        self.names.entry(TypeId::of::<E>()).or_insert(name);
        self
    }

    /// 由类型名取得反序列化工厂
    fn factory(&self, name: &str) -> DispatchResult<EventFactory> {
        self.factories
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| DispatchError::UnknownEventType {
                name: name.to_string(),
            })
    }

    /// 名称是否已注册
    pub fn resolve(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn type_name_of(&self, type_id: TypeId) -> Option<String> {
        self.names.get(&type_id).map(|n| n.value().clone())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn clear(&self) {
        self.factories.clear();
        self.names.clear();
    }
}

impl std::fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("EventTypeRegistry")
            .field("names", &names)
            .finish()
    }
}

/// 基于 serde_json 的序列化器，紧凑输出
#[derive(Debug, Clone, Default)]
pub struct JsonEventSerializer {
    types: Arc<EventTypeRegistry>,
}

impl JsonEventSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(types: Arc<EventTypeRegistry>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &Arc<EventTypeRegistry> {
        &self.types
    }
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &dyn Event) -> DispatchResult<String> {
        let value = event.to_json()?;
        Ok(serde_json::to_string(&value)?)
    }

    fn deserialize(&self, payload: &str, type_hint: &str) -> DispatchResult<Box<dyn Event>> {
        let factory = self.types.factory(type_hint)?;
        factory(payload)
    }

    /// 已注册的类型使用注册名，否则回退到事件自身的类型名
    fn type_name(&self, event: &dyn Event) -> String {
        self.types
            .type_name_of(event.concrete_type_id())
            .unwrap_or_else(|| event.event_type().to_string())
    }
}
