//! 死信（Dead Letter）
//!
//! 重试耗尽的事件被序列化为 `DeadLetterEnvelope` 并按值交给 `DeadLetterSink`，
//! 此后信封归存储方所有。
//!
use crate::{
    error::DispatchResult,
    event::Event,
    serializer::EventSerializer,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// 内存死信队列默认容量
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// 死信信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    /// 序列化器产出的不透明载荷
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u32,
}

impl DeadLetterEnvelope {
    pub fn create(event: &dyn Event, serializer: &dyn EventSerializer) -> DispatchResult<Self> {
        Ok(Self {
            event_id: event.id(),
            event_type: serializer.type_name(event),
            payload: serializer.serialize(event)?,
            timestamp: Utc::now(),
            schema_version: event.schema_version(),
        })
    }

    /// 还原为事件对象（供恢复工具使用）
    pub fn restore(&self, serializer: &dyn EventSerializer) -> DispatchResult<Box<dyn Event>> {
        serializer.deserialize(&self.payload, &self.event_type)
    }
}

/// 死信存储
///
/// 实现需容忍并发 `save`。
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn save(&self, envelope: DeadLetterEnvelope, reason: &str) -> DispatchResult<()>;

    /// 当前死信快照
    async fn list_failed(&self) -> DispatchResult<Vec<DeadLetterEnvelope>>;
}

/// 一条死信记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    pub envelope: DeadLetterEnvelope,
    pub reason: String,
}

/// 有界内存死信队列，满时淘汰最旧的一条
#[derive(Debug)]
pub struct InMemoryDeadLetterQueue {
    max_capacity: usize,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            max_capacity,
            entries: Mutex::new(VecDeque::with_capacity(max_capacity.min(1024))),
        }
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// 带原因的死信快照（由旧到新）
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryDeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn save(&self, envelope: DeadLetterEnvelope, reason: &str) -> DispatchResult<()> {
        let event_type = envelope.event_type.clone();
        let evicted = {
            let mut entries = self.entries.lock();
            let mut evicted = None;
            if self.max_capacity > 0 && entries.len() >= self.max_capacity {
                evicted = entries.pop_front();
            }
            if self.max_capacity > 0 {
                entries.push_back(DeadLetterEntry {
                    envelope,
                    reason: reason.to_string(),
                });
            }
            evicted
        };

        if let Some(old) = evicted {
            tracing::debug!(event_id = %old.envelope.event_id, "dead letter evicted at capacity");
        }
        tracing::info!(event_type = %event_type, reason, "dead letter stored");
        Ok(())
    }

    async fn list_failed(&self) -> DispatchResult<Vec<DeadLetterEnvelope>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|entry| entry.envelope.clone())
            .collect())
    }
}
