//! 事件分发统一错误定义
//!
//! 覆盖分发链路上的失败分类：无处理器、处理器失败/恐慌/超时、熔断拒绝、取消，
//! 以及序列化与死信存储等外部协作方的错误。
//! 分发循环会将处理器侧的错误统一转换为失败的 `HandlerResult`，不会向上抛出。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DispatchError {
    // --- 分发 ---
    #[error("no handlers found for event type: {event_type}")]
    NoHandlers { event_type: String },
    #[error("handler error: {source}")]
    Handler {
        #[source]
        source: anyhow::Error,
    },
    #[error("handler panicked: {reason}")]
    HandlerPanicked { reason: String },
    #[error("handler timed out after {timeout_ms}ms")]
    HandlerTimeout { timeout_ms: u128 },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    // --- 弹性 ---
    #[error("circuit is open")]
    CircuitOpen,
    #[error("operation was cancelled")]
    Cancelled,

    // --- 序列化/死信 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("unknown event type: {name}")]
    UnknownEventType { name: String },
    #[error("dead letter error: {reason}")]
    DeadLetter { reason: String },
}

impl DispatchError {
    pub fn handler(source: impl Into<anyhow::Error>) -> Self {
        Self::Handler {
            source: source.into(),
        }
    }

    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Self::DeadLetter {
            reason: reason.into(),
        }
    }
}

/// 处理器返回的 `anyhow::Error`：若本身即为 `DispatchError` 则原样取回，否则包装为 `Handler`
impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DispatchError>() {
            Ok(inner) => inner,
            Err(other) => Self::Handler { source: other },
        }
    }
}

/// 统一 Result 类型别名
pub type DispatchResult<T> = Result<T, DispatchError>;

// 从 panic 载荷中提取可读信息
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
