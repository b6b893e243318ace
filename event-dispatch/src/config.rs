//! 监听器配置
//!
use crate::{circuit::CircuitBreaker, retry::RetryPolicy};
use bon::Builder;
use std::time::Duration;

/// 分发监听器配置
///
/// 未设置的字段取 `Default` 中的值：
///
/// ```
/// use event_dispatch::config::ListenerConfig;
/// use std::time::Duration;
///
/// let config = ListenerConfig::builder()
///     .max_retries(5)
///     .base_backoff(Duration::from_millis(50))
///     .build();
/// assert_eq!(config.backoff_multiplier, 2);
/// assert_eq!(config.handler_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct ListenerConfig {
    /// 失败后的最大重试次数
    #[builder(default = 3)]
    pub max_retries: u32,
    /// 退避基准时长
    #[builder(default = Duration::from_millis(100))]
    pub base_backoff: Duration,
    /// 退避倍数
    #[builder(default = 2)]
    pub backoff_multiplier: u32,
    /// 熔断阈值（累计失败次数）
    #[builder(default = 5)]
    pub circuit_breaker_failure_threshold: u32,
    /// 熔断后的自动恢复时长
    #[builder(default = Duration::from_secs(60))]
    pub circuit_breaker_reset_timeout: Duration,
    /// 单条管道调用的超时
    #[builder(default = Duration::from_secs(30))]
    pub handler_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ListenerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: self.base_backoff,
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.circuit_breaker_failure_threshold,
            self.circuit_breaker_reset_timeout,
        )
    }
}
