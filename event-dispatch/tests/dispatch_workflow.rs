use anyhow::Result as AnyResult;
use async_trait::async_trait;
use event_dispatch::event::{Confirmable, Event, EventMeta};
use event_dispatch::{
    DispatchError, DispatcherHost, EventHandler, EventMiddleware, HandlerResult, ListenerConfig,
    LoggingMiddleware, Next, TimingMiddleware,
};
use event_dispatch_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[event(name = "account.opened")]
struct AccountOpened {
    owner: String,
}

#[event(name = "account.audited")]
struct AccountAudited {
    owner: String,
}

#[event]
struct Unrouted {
    note: String,
}

fn opened(owner: &str) -> AccountOpened {
    AccountOpened {
        meta: EventMeta::new(),
        owner: owner.to_string(),
    }
}

fn audited(owner: &str) -> AccountAudited {
    AccountAudited {
        meta: EventMeta::new(),
        owner: owner.to_string(),
    }
}

type Journal = Arc<Mutex<Vec<String>>>;

struct Welcome {
    journal: Journal,
}

#[async_trait]
impl EventHandler<AccountOpened> for Welcome {
    async fn handle(
        &self,
        event: &AccountOpened,
        _token: &CancellationToken,
    ) -> AnyResult<HandlerResult> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("welcome:{}", event.owner));
        Ok(HandlerResult::success(Some("welcome".into()), None))
    }
}

struct Audit {
    journal: Journal,
}

#[async_trait]
impl EventHandler<AccountAudited> for Audit {
    async fn handle(
        &self,
        event: &AccountAudited,
        _token: &CancellationToken,
    ) -> AnyResult<HandlerResult> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("audit:{}", event.owner));
        Ok(HandlerResult::ok())
    }
}

/// 进入时记录 `name>`，返回时把消息包成 `name(...)`
struct Wrap {
    name: &'static str,
    journal: Journal,
}

#[async_trait]
impl EventMiddleware for Wrap {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(
        &self,
        _event: &dyn Event,
        _token: &CancellationToken,
        next: Next<'_>,
    ) -> AnyResult<HandlerResult> {
        self.journal.lock().unwrap().push(format!("{}>", self.name));
        let inner = next.run().await?;
        let message = format!("{}({})", self.name, inner.message().unwrap_or_default());
        Ok(HandlerResult::success(Some(message), Some(inner.metadata().clone())))
    }
}

/// 按事件主人名拒绝
struct Gatekeeper {
    rejected: AtomicUsize,
}

#[async_trait]
impl EventMiddleware for Gatekeeper {
    fn name(&self) -> &'static str {
        "gatekeeper"
    }

    async fn invoke(
        &self,
        event: &dyn Event,
        _token: &CancellationToken,
        next: Next<'_>,
    ) -> AnyResult<HandlerResult> {
        match event.downcast_ref::<AccountOpened>() {
            Some(e) if e.owner == "mallory" => {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                Ok(HandlerResult::fail("owner is blocked"))
            }
            _ => next.run().await,
        }
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn middleware_wraps_handler_outermost_first() {
    let journal: Journal = Arc::default();
    let host = DispatcherHost::builder().build();
    host.register::<AccountOpened, _>(
        Arc::new(Welcome {
            journal: journal.clone(),
        }),
        vec![
            Arc::new(Wrap {
                name: "A",
                journal: journal.clone(),
            }),
            Arc::new(Wrap {
                name: "B",
                journal: journal.clone(),
            }),
            Arc::new(TimingMiddleware),
        ],
    );

    let result = host
        .enqueue_async(opened("alice"), &CancellationToken::new())
        .await;

    assert!(result.is_success());
    assert_eq!(result.message(), Some("A(B(welcome))"));
    assert!(result.metadata().contains_key("elapsed_ms"));
    assert_eq!(*journal.lock().unwrap(), vec!["A>", "B>", "welcome:alice"]);
    host.shutdown().await;
}

#[tokio::test]
async fn events_route_by_exact_type() {
    let journal: Journal = Arc::default();
    let host = DispatcherHost::builder().build();
    host.register::<AccountOpened, _>(
        Arc::new(Welcome {
            journal: journal.clone(),
        }),
        vec![Arc::new(LoggingMiddleware)],
    )
    .register::<AccountAudited, _>(
        Arc::new(Audit {
            journal: journal.clone(),
        }),
        vec![],
    );

    host.enqueue(opened("bob")).unwrap();
    host.enqueue(audited("bob")).unwrap();
    host.enqueue(opened("carol")).unwrap();

    wait_until(|| host.metrics().processed() == 3).await;
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["welcome:bob", "audit:bob", "welcome:carol"]
    );
    host.shutdown().await;
}

#[tokio::test]
async fn short_circuiting_middleware_fails_the_event() {
    let journal: Journal = Arc::default();
    let gate = Arc::new(Gatekeeper {
        rejected: AtomicUsize::new(0),
    });
    let host = DispatcherHost::builder()
        .config(ListenerConfig::builder().max_retries(0).build())
        .build();
    host.register::<AccountOpened, _>(
        Arc::new(Welcome {
            journal: journal.clone(),
        }),
        vec![gate.clone()],
    );

    let blocked = host
        .enqueue_async(opened("mallory"), &CancellationToken::new())
        .await;
    let allowed = host
        .enqueue_async(opened("dave"), &CancellationToken::new())
        .await;

    assert_eq!(blocked.message(), Some("owner is blocked"));
    assert!(allowed.is_success());
    assert_eq!(gate.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(*journal.lock().unwrap(), vec!["welcome:dave"]);

    let letters = host.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event_type, std::any::type_name::<AccountOpened>());
    host.shutdown().await;
}

#[tokio::test]
async fn unrouted_events_never_block_producers() {
    let host = DispatcherHost::builder().build();

    for i in 0..100 {
        host.enqueue(Unrouted {
            meta: EventMeta::new(),
            note: format!("n{i}"),
        })
        .unwrap();
    }
    let result = host
        .enqueue_async(
            Unrouted {
                meta: EventMeta::new(),
                note: "confirm".into(),
            },
            &CancellationToken::new(),
        )
        .await;

    assert!(result.message().unwrap().contains("no handlers found"));
    assert!(matches!(
        result.error(),
        Some(DispatchError::NoHandlers { event_type }) if event_type.ends_with("Unrouted")
    ));
    assert_eq!(host.metrics().snapshot().processed, 0);
    assert_eq!(host.metrics().snapshot().failed, 0);
    host.shutdown().await;
}

#[tokio::test]
async fn every_confirmable_resolves_exactly_once() {
    let journal: Journal = Arc::default();
    let host = DispatcherHost::builder()
        .config(ListenerConfig::builder().max_retries(0).build())
        .build();
    host.register::<AccountOpened, _>(
        Arc::new(Welcome {
            journal: journal.clone(),
        }),
        vec![Arc::new(Gatekeeper {
            rejected: AtomicUsize::new(0),
        })],
    );

    let mut completions = Vec::new();
    for owner in ["erin", "mallory", "frank"] {
        completions.push(host.enqueue_confirmable(Confirmable::new(opened(owner))));
    }
    completions.push(host.enqueue_confirmable(Confirmable::new(Unrouted {
        meta: EventMeta::new(),
        note: "nobody listens".into(),
    })));

    let mut outcomes = Vec::new();
    for completion in &completions {
        let result = completion.wait().await;
        // 已完成的槽不会被再次改写
        assert!(!completion.resolve(HandlerResult::ok()));
        assert_eq!(
            completion.try_result().map(|r| r.is_success()),
            Some(result.is_success())
        );
        outcomes.push(result.is_success());
    }
    assert_eq!(outcomes, vec![true, false, true, false]);

    host.shutdown().await;
    // 关闭后新的可确认事件立即以取消结束
    let late = host.enqueue_confirmable(Confirmable::new(opened("late")));
    assert!(matches!(
        late.wait().await.error(),
        Some(DispatchError::Cancelled)
    ));
}
