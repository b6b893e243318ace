use event_dispatch::event::{Event, EventMeta};
use event_dispatch_macros::event;

#[event]
struct UserRegistered {
    email: String,
}

fn main() {
    let e = UserRegistered {
        meta: EventMeta::new(),
        email: "a@example.com".to_string(),
    };
    assert!(e.event_type().ends_with("UserRegistered"));
    assert_eq!(e.schema_version(), 1);

    let json = e.to_json().unwrap();
    assert_eq!(json["email"], "a@example.com");
    assert_eq!(json["id"], e.id().to_string());

    let copy = e.clone();
    assert_eq!(copy.id(), e.id());
    let _ = format!("{copy:?}");
}
