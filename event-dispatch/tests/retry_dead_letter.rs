use anyhow::Result as AnyResult;
use async_trait::async_trait;
use event_dispatch::dead_letter::{DeadLetterEnvelope, DeadLetterSink};
use event_dispatch::event::EventMeta;
use event_dispatch::{
    CircuitState, DispatchError, DispatchResult, DispatcherHost, Event, EventHandler, HandlerResult,
    InMemoryDeadLetterQueue, ListenerConfig,
};
use event_dispatch_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[event(name = "shipment.requested", version = 2)]
struct ShipmentRequested {
    parcel: String,
}

fn shipment(parcel: &str) -> ShipmentRequested {
    ShipmentRequested {
        meta: EventMeta::new(),
        parcel: parcel.to_string(),
    }
}

/// 前 `fail_first` 次调用返回错误，之后成功
struct Courier {
    fail_first: usize,
    calls: AtomicUsize,
    attempts_at: Mutex<Vec<Instant>>,
}

impl Courier {
    fn new(fail_first: usize) -> Self {
        Self {
            fail_first,
            calls: AtomicUsize::new(0),
            attempts_at: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventHandler<ShipmentRequested> for Courier {
    async fn handle(
        &self,
        event: &ShipmentRequested,
        _token: &CancellationToken,
    ) -> AnyResult<HandlerResult> {
        self.attempts_at.lock().unwrap().push(Instant::now());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            anyhow::bail!("carrier api unavailable for {}", event.parcel);
        }
        Ok(HandlerResult::success(Some(event.parcel.clone()), None))
    }
}

/// 总是拒绝写入的死信存储
#[derive(Default)]
struct BrokenSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl DeadLetterSink for BrokenSink {
    async fn save(&self, _envelope: DeadLetterEnvelope, _reason: &str) -> DispatchResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DispatchError::dead_letter("disk full"))
    }

    async fn list_failed(&self) -> DispatchResult<Vec<DeadLetterEnvelope>> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_follows_exponential_schedule() {
    let dlq = Arc::new(InMemoryDeadLetterQueue::new(10));
    let host = DispatcherHost::builder().dead_letters(dlq.clone()).build();
    let courier = Arc::new(Courier::new(usize::MAX));
    host.register::<ShipmentRequested, _>(courier.clone(), vec![]);

    let event = shipment("P-1");
    let id = event.id();
    let result = host.enqueue_async(event, &CancellationToken::new()).await;

    assert!(!result.is_success());
    assert!(matches!(result.error(), Some(DispatchError::Handler { .. })));

    let at = courier.attempts_at.lock().unwrap().clone();
    assert_eq!(at.len(), 4);
    for (gap, min_ms) in at.windows(2).map(|w| w[1] - w[0]).zip([200, 400, 800]) {
        assert!(gap >= Duration::from_millis(min_ms), "gap {gap:?} < {min_ms}ms");
    }

    let m = host.metrics().snapshot();
    assert_eq!(m.failed, 4);
    assert_eq!(m.retried, 3);
    assert_eq!(m.dropped, 1);
    assert_eq!(m.processed, 0);

    let entries = dlq.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, "max retries exceeded");
    assert_eq!(entries[0].envelope.event_id, id);
    assert_eq!(entries[0].envelope.schema_version, 2);
    host.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_within_budget() {
    let host = DispatcherHost::builder().build();
    let courier = Arc::new(Courier::new(2));
    host.register::<ShipmentRequested, _>(courier.clone(), vec![]);

    let event = shipment("P-2");
    let id = event.id();
    let result = host.enqueue_async(event, &CancellationToken::new()).await;

    assert!(result.is_success());
    assert_eq!(result.message(), Some("P-2"));
    assert_eq!(courier.calls.load(Ordering::SeqCst), 3);

    let m = host.metrics().snapshot();
    assert_eq!((m.processed, m.failed, m.retried, m.dropped), (1, 2, 2, 0));
    assert_eq!(host.listener().retry_attempts(id), 0);
    assert!(host.dead_letters().await.unwrap().is_empty());
    host.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn breaker_recovers_by_time_but_retrips_on_next_failure() {
    let config = ListenerConfig::builder()
        .max_retries(0)
        .circuit_breaker_failure_threshold(2)
        .circuit_breaker_reset_timeout(Duration::from_secs(5))
        .build();
    let host = DispatcherHost::builder().config(config).build();
    let courier = Arc::new(Courier::new(usize::MAX));
    host.register::<ShipmentRequested, _>(courier.clone(), vec![]);
    let token = CancellationToken::new();
    let breaker = host.listener().circuit_breaker();

    host.enqueue_async(shipment("a"), &token).await;
    host.enqueue_async(shipment("b"), &token).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = host.enqueue_async(shipment("c"), &token).await;
    assert!(matches!(rejected.error(), Some(DispatchError::CircuitOpen)));
    assert_eq!(courier.calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    // 一次失败即再次熔断
    host.enqueue_async(shipment("d"), &token).await;
    assert_eq!(courier.calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), CircuitState::Open);

    breaker.reset();
    assert_eq!(breaker.failure_count(), 0);
    host.enqueue_async(shipment("e"), &token).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(courier.calls.load(Ordering::SeqCst), 4);
    host.shutdown().await;
}

#[tokio::test]
async fn failing_sink_does_not_stop_the_loop() {
    let sink = Arc::new(BrokenSink::default());
    let host = DispatcherHost::builder()
        .config(ListenerConfig::builder().max_retries(0).build())
        .dead_letters(sink.clone())
        .build();
    let courier = Arc::new(Courier::new(1));
    host.register::<ShipmentRequested, _>(courier.clone(), vec![]);
    let token = CancellationToken::new();

    let first = host.enqueue_async(shipment("lost"), &token).await;
    assert!(!first.is_success());
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

    let second = host.enqueue_async(shipment("kept"), &token).await;
    assert!(second.is_success());
    assert!(host.listener().is_running());
    host.shutdown().await;
}

#[tokio::test]
async fn shutdown_during_backoff_cancels_waiting_producer() {
    let config = ListenerConfig::builder()
        .base_backoff(Duration::from_secs(30))
        .build();
    let host = Arc::new(DispatcherHost::builder().config(config).build());
    host.register::<ShipmentRequested, _>(Arc::new(Courier::new(usize::MAX)), vec![]);

    let producer = {
        let host = host.clone();
        tokio::spawn(async move {
            host.enqueue_async(shipment("stuck"), &CancellationToken::new())
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(2), async {
        while host.metrics().failed() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    host.shutdown().await;

    let result = producer.await.unwrap();
    assert_eq!(result.message(), Some("operation was cancelled"));
    assert_eq!(host.metrics().dropped(), 0);
}
