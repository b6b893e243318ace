//! 熔断器（CircuitBreaker）
//!
//! 失败计数闸门，带基于时间的自动恢复：
//!
//! ```text
//!   Closed ── failure_count >= threshold ──► Open
//!     ▲                                        │
//!     │          reset_timeout 已过（计数不清零） │
//!     └────────────────────────────────────────┘
//! ```
//!
//! 注意：`reset_timeout` 过后闸门按“未熔断”计算，但失败计数并不会被清零，
//! 只有显式调用 `reset()` 才会清零。因此自动恢复后的下一次失败会立即再次熔断。
//! 成功调用也不会清零计数。
//!
use crate::error::{DispatchError, panic_reason};
use crate::result::HandlerResult;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;

/// 熔断器当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 快速失败
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    tripped: bool,
    tripped_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// 已熔断且距熔断时刻未超过 `reset_timeout`
    pub fn is_tripped(&self) -> bool {
        let state = self.state.lock();
        Self::tripped_now(&state, self.reset_timeout)
    }

    pub fn state(&self) -> CircuitState {
        if self.is_tripped() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// 经熔断器执行一次动作
    ///
    /// - 熔断中：不调用 `action`，直接返回携带 `CircuitOpen` 的失败结果；
    /// - 否则执行动作，返回错误、发生 panic 或返回失败结果时记录一次失败。
    pub async fn execute<F, Fut>(&self, action: F) -> HandlerResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HandlerResult>>,
    {
        if self.is_tripped() {
            return HandlerResult::failure(
                "circuit breaker tripped",
                Some(DispatchError::CircuitOpen),
                None,
            );
        }

        match AssertUnwindSafe(action()).catch_unwind().await {
            Ok(Ok(result)) => {
                if !result.is_success() {
                    self.record_failure();
                }
                result
            }
            Ok(Err(err)) => {
                self.record_failure();
                HandlerResult::failure(
                    "operation failed in circuit breaker",
                    Some(DispatchError::from(err)),
                    None,
                )
            }
            Err(payload) => {
                self.record_failure();
                HandlerResult::failure(
                    "operation failed in circuit breaker",
                    Some(DispatchError::HandlerPanicked {
                        reason: panic_reason(payload.as_ref()),
                    }),
                    None,
                )
            }
        }
    }

    /// 无条件清除熔断标记与失败计数
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = BreakerState::default();
        tracing::info!("circuit breaker reset");
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        let was_tripped = Self::tripped_now(&state, self.reset_timeout);

        state.failure_count = state.failure_count.saturating_add(1);
        if state.failure_count >= self.failure_threshold {
            state.tripped = true;
            state.tripped_at = Some(Instant::now());

            if !was_tripped {
                tracing::warn!(
                    failures = state.failure_count,
                    threshold = self.failure_threshold,
                    reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                    "circuit breaker tripped"
                );
            }
        }
    }

    fn tripped_now(state: &BreakerState, reset_timeout: Duration) -> bool {
        state.tripped
            && state
                .tripped_at
                .is_some_and(|at| at.elapsed() < reset_timeout)
    }
}
