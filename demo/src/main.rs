use anyhow::Result;
use async_trait::async_trait;
use event_dispatch::event::{Confirmable, EventMeta};
use event_dispatch::{
    DispatcherHost, EventHandler, HandlerResult, ListenerConfig, LoggingMiddleware,
    TimingMiddleware,
};
use event_dispatch_macros::event;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[event(name = "payment.captured")]
struct PaymentCaptured {
    payment_id: String,
    amount_cents: u64,
}

#[event(name = "payment.refund_requested", version = 2)]
struct RefundRequested {
    payment_id: String,
    reason: String,
}

#[event(name = "ledger.audit")]
struct LedgerAudit {
    batch: u32,
}

struct Ledger {
    captured: AtomicU32,
}

#[async_trait]
impl EventHandler<PaymentCaptured> for Ledger {
    async fn handle(
        &self,
        event: &PaymentCaptured,
        _token: &CancellationToken,
    ) -> Result<HandlerResult> {
        self.captured.fetch_add(1, Ordering::Relaxed);
        tracing::info!(payment_id = %event.payment_id, amount = event.amount_cents, "ledger updated");
        Ok(HandlerResult::ok())
    }
}

/// 退款网关：奇数次调用失败，偶数次成功；`reason = "fraud"` 永远失败
struct RefundGateway {
    calls: AtomicU32,
}

#[async_trait]
impl EventHandler<RefundRequested> for RefundGateway {
    async fn handle(
        &self,
        event: &RefundRequested,
        token: &CancellationToken,
    ) -> Result<HandlerResult> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            _ = token.cancelled() => anyhow::bail!("refund aborted by shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(15)) => {}
        }

        if event.reason == "fraud" {
            return Ok(HandlerResult::fail("refund rejected by risk engine"));
        }
        if n % 2 == 0 {
            anyhow::bail!("gateway timeout for {}", event.payment_id);
        }
        Ok(HandlerResult::success(
            Some(format!("refunded {}", event.payment_id)),
            None,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,event_dispatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let host = Arc::new(
        DispatcherHost::builder()
            .config(
                ListenerConfig::builder()
                    .max_retries(2)
                    .base_backoff(Duration::from_millis(25))
                    .handler_timeout(Duration::from_secs(2))
                    .build(),
            )
            .build(),
    );

    let ledger = Arc::new(Ledger {
        captured: AtomicU32::new(0),
    });
    host.register::<PaymentCaptured, _>(ledger.clone(), vec![Arc::new(TimingMiddleware)])
        .register::<RefundRequested, _>(
            Arc::new(RefundGateway {
                calls: AtomicU32::new(0),
            }),
            vec![Arc::new(LoggingMiddleware), Arc::new(TimingMiddleware)],
        );

    // 并发生产者：即发即弃的扣款事件
    let mut producers = tokio::task::JoinSet::new();
    for worker in 0..4 {
        let host = host.clone();
        producers.spawn(async move {
            for i in 0..5u32 {
                let event = PaymentCaptured {
                    meta: EventMeta::new(),
                    payment_id: format!("pay-{worker}-{i}"),
                    amount_cents: 1_000 + u64::from(i) * 250,
                };
                if let Err(err) = host.enqueue(event) {
                    tracing::warn!(error = %err, "enqueue rejected");
                }
            }
        });
    }
    while let Some(res) = producers.join_next().await {
        res?;
    }

    // 可确认事件：优先于队列中的普通事件处理
    let refund = host.enqueue_confirmable(Confirmable::new(RefundRequested {
        meta: EventMeta::new(),
        payment_id: "pay-0-1".into(),
        reason: "duplicate charge".into(),
    }));
    let fraud = host
        .enqueue_async(
            RefundRequested {
                meta: EventMeta::new(),
                payment_id: "pay-3-4".into(),
                reason: "fraud".into(),
            },
            &CancellationToken::new(),
        )
        .await;

    let refund = refund.wait().await;
    tracing::info!(
        success = refund.is_success(),
        message = refund.message().unwrap_or_default(),
        "refund settled"
    );
    tracing::info!(
        success = fraud.is_success(),
        message = fraud.message().unwrap_or_default(),
        "fraud refund settled"
    );

    // 无处理器的事件不会阻塞生产者
    let audit = host
        .enqueue_async(
            LedgerAudit {
                meta: EventMeta::new(),
                batch: 7,
            },
            &CancellationToken::new(),
        )
        .await;
    tracing::info!(message = audit.message().unwrap_or_default(), "audit dispatched");

    tokio::time::sleep(Duration::from_millis(200)).await;

    for letter in host.dead_letters().await? {
        tracing::warn!(
            event_id = %letter.event_id,
            event_type = %letter.event_type,
            schema_version = letter.schema_version,
            payload = %letter.payload,
            "dead letter"
        );
    }

    tracing::info!(
        captured = ledger.captured.load(Ordering::Relaxed),
        breaker = %host.listener().circuit_breaker().state(),
        metrics = %serde_json::to_string(&host.metrics().snapshot())?,
        "dispatch summary"
    );

    host.shutdown().await;
    Ok(())
}
