//! 处理器注册表（HandlerRegistry）
//!
//! - 以具体事件类型的 `TypeId` 为键，按注册顺序保存管道（中间件链 + 终端处理器）；
//! - 中间件链在注册时一次性由右向左折叠组合，调用时不再重建；
//! - 只做精确类型匹配，不做任何继承式匹配；
//! - 注册可与分发并发进行：列表只增不减，已存在的条目顺序不变。
//!
use crate::{
    error::DispatchError,
    event::Event,
    handler::EventHandler,
    middleware::{EventMiddleware, Next, PipelineFn, PipelineFuture, pipeline_fn},
};
use dashmap::DashMap;
use std::any::{TypeId, type_name};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 绑定到某一事件类型的一条管道
#[derive(Clone)]
pub struct Pipeline {
    handler_name: String,
    middlewares: Vec<&'static str>,
    invoke: PipelineFn,
}

impl Pipeline {
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// 中间件名称，由外到内
    pub fn middlewares(&self) -> &[&'static str] {
        &self.middlewares
    }

    pub fn invoke<'a>(
        &'a self,
        event: &'a dyn Event,
        token: &'a CancellationToken,
    ) -> PipelineFuture<'a> {
        (self.invoke)(event, token)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handler_name", &self.handler_name)
            .field("middlewares", &self.middlewares)
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    pipelines: DashMap<TypeId, Vec<Pipeline>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为事件类型 `E` 注册处理器与中间件，返回自身以便链式注册
    ///
    /// 中间件 `[m1, m2, ..., mN]` 组合为 `m1(m2(...mN(handler)))`，`m1` 最先看到事件、最后看到结果。
    pub fn register<E, H>(&self, handler: Arc<H>, middlewares: Vec<Arc<dyn EventMiddleware>>) -> &Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let handler_name = handler.handler_name().to_string();
        let names = middlewares.iter().map(|m| m.name()).collect();
        let invoke = compose::<E, H>(handler, middlewares);

        tracing::debug!(
            event_type = type_name::<E>(),
            handler = %handler_name,
            "registered event handler"
        );

        self.pipelines
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Pipeline {
                handler_name,
                middlewares: names,
                invoke,
            });

        self
    }

    /// 已绑定到该类型的管道快照（按注册顺序，可能为空）
    pub fn pipelines_for(&self, type_id: TypeId) -> Vec<Pipeline> {
        self.pipelines
            .get(&type_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    pub fn pipelines_for_event(&self, event: &dyn Event) -> Vec<Pipeline> {
        self.pipelines_for(event.concrete_type_id())
    }

    pub fn handler_count(&self, type_id: TypeId) -> usize {
        self.pipelines.get(&type_id).map(|list| list.len()).unwrap_or(0)
    }

    pub fn registered_types(&self) -> Vec<TypeId> {
        self.pipelines.iter().map(|e| *e.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

// 由右向左折叠：先包裹 mN，最后包裹 m1
fn compose<E, H>(handler: Arc<H>, middlewares: Vec<Arc<dyn EventMiddleware>>) -> PipelineFn
where
    E: Event,
    H: EventHandler<E> + 'static,
{
    let terminal = pipeline_fn(move |event, token| {
        let handler = handler.clone();

        Box::pin(async move {
            // 键与闭包同属泛型 E，正常情况下不会失败
            match event.downcast_ref::<E>() {
                Some(typed) => handler.handle(typed, token).await,
                None => Err(DispatchError::TypeMismatch {
                    expected: type_name::<E>(),
                    found: event.event_type(),
                }
                .into()),
            }
        })
    });

    middlewares.into_iter().rev().fold(terminal, |inner, middleware| {
        pipeline_fn(move |event, token| {
            let middleware = middleware.clone();
            let inner = inner.clone();

            Box::pin(async move {
                middleware
                    .invoke(event, token, Next::new(&inner, event, token))
                    .await
            })
        })
    })
}
