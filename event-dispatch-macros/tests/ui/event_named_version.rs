use event_dispatch::event::{Event, EventMeta};
use event_dispatch_macros::event;

#[event(name = "order.shipped", version = 3)]
struct OrderShipped {
    order_no: String,
    carrier: Option<String>,
}

fn main() {
    let e = OrderShipped {
        meta: EventMeta::new(),
        order_no: "SO-9".to_string(),
        carrier: None,
    };
    assert_eq!(e.event_type(), "order.shipped");
    assert_eq!(e.schema_version(), 3);

    let payload = serde_json_roundtrip(&e);
    assert_eq!(payload.order_no, "SO-9");
    assert_eq!(payload.id(), e.id());
}

fn serde_json_roundtrip(e: &OrderShipped) -> OrderShipped {
    let text = e.to_json().unwrap().to_string();
    event_dispatch::__private::serde_json::from_str(&text).unwrap()
}
