//! 处理结果（HandlerResult）
//!
//! 一次处理器调用的结果：成功标记、可读消息、可选错误详情与按插入顺序保存的元数据。
//! 结果一经构造即不可变，只能通过 `success` / `failure` 两个构造函数创建。
//!
use crate::error::DispatchError;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// 结果元数据（按插入顺序）
pub type Metadata = IndexMap<String, Value>;

#[derive(Debug, Clone)]
pub struct HandlerResult {
    success: bool,
    message: Option<String>,
    error: Option<Arc<DispatchError>>,
    metadata: Metadata,
}

impl HandlerResult {
    /// 成功结果
    pub fn success(message: Option<String>, metadata: Option<Metadata>) -> Self {
        Self {
            success: true,
            message,
            error: None,
            metadata: metadata.unwrap_or_default(),
        }
    }

    /// 失败结果
    pub fn failure(
        message: impl Into<String>,
        error: Option<DispatchError>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error: error.map(Arc::new),
            metadata: metadata.unwrap_or_default(),
        }
    }

    pub fn ok() -> Self {
        Self::success(None, None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::failure(message, None, None)
    }

    /// 携带错误详情的失败结果，消息取自错误本身
    pub fn from_error(error: DispatchError) -> Self {
        Self::failure(error.to_string(), Some(error), None)
    }

    /// 调用方取消（或引擎关闭）时的统一结果
    pub fn cancelled() -> Self {
        Self::failure(
            "operation was cancelled",
            Some(DispatchError::Cancelled),
            None,
        )
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// 基于当前结果派生一个新结果，并追加一条元数据（原结果不变）
    pub fn with_entry(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value.into());
        next
    }
}
