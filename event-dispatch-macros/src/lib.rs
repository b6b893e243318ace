use proc_macro::TokenStream;

mod event;
mod utils;

/// 事件宏
/// - 作用于具名字段结构体，使其成为可分发事件
/// - 缺少时补上身份字段 `meta: EventMeta`（`#[serde(flatten)]`）
/// - 合并派生 `Debug, Clone, Serialize, Deserialize`
/// - 实现 `::event_dispatch::event::Event`
/// - 支持参数：`#[event(name = "order.placed", version = 2)]`，
///   默认类型名为 Rust 类型全路径、版本为 1
///
/// ```ignore
/// use event_dispatch::event::EventMeta;
/// use event_dispatch_macros::event;
///
/// #[event(name = "order.placed")]
/// struct OrderPlaced {
///     order_no: String,
/// }
///
/// let e = OrderPlaced { meta: EventMeta::new(), order_no: "SO-1".into() };
/// ```
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
