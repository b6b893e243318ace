//! 重试策略与重试计数
//!
//! 纯指数退避：`delay = base_backoff * backoff_multiplier ^ attempt`，无抖动、无上限；
//! 需要上限的调用方应保守地设置 `max_retries`。
//!
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试前的等待时长（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.base_backoff.saturating_mul(factor)
    }

    /// 根据当前已重试次数做出决策
    pub fn decide(&self, retries_so_far: u32) -> RetryDecision {
        if retries_so_far < self.max_retries {
            let attempt = retries_so_far + 1;
            RetryDecision::Retry {
                attempt,
                delay: self.delay_for(attempt),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: retries_so_far,
            }
        }
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待 `delay` 后进行第 `attempt` 次重试
    Retry { attempt: u32, delay: Duration },
    /// 已达上限，转入死信
    Exhausted { attempts: u32 },
}

/// 事件 ID → 已重试次数
///
/// 仅由分发循环写入；任意线程可并发读取。
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: DashMap<Uuid, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前已重试次数（无记录时为 0）
    pub fn attempts(&self, event_id: Uuid) -> u32 {
        self.attempts.get(&event_id).map(|r| *r).unwrap_or(0)
    }

    pub(crate) fn record(&self, event_id: Uuid, attempt: u32) {
        self.attempts.insert(event_id, attempt);
    }

    pub(crate) fn clear(&self, event_id: Uuid) {
        self.attempts.remove(&event_id);
    }

    pub fn contains(&self, event_id: Uuid) -> bool {
        self.attempts.contains_key(&event_id)
    }

    /// 正在重试中的事件数量
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
