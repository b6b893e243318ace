use event_dispatch::event::{Event, EventMeta};
use event_dispatch_macros::event;

// 自带 meta 字段与派生时不重复生成
#[event(version = 2)]
#[derive(Debug, Clone)]
struct StockAdjusted {
    sku: String,
    #[serde(flatten)]
    meta: EventMeta,
    delta: i64,
}

fn main() {
    let e = StockAdjusted {
        sku: "SKU-1".to_string(),
        meta: EventMeta::new(),
        delta: -2,
    };
    let boxed: Box<dyn Event> = Box::new(e);
    assert_eq!(boxed.schema_version(), 2);
    assert_eq!(boxed.downcast_ref::<StockAdjusted>().map(|s| s.delta), Some(-2));
}
