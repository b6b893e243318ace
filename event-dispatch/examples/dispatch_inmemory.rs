/// 分发引擎（内存版）示例
/// 展示 注册 -> 投递 -> 中间件 -> 重试退避 -> 死信 的闭环，以及从死信恢复后重新投递
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use event_dispatch::event::EventMeta;
use event_dispatch::{
    DispatcherHost, EventHandler, HandlerResult, ListenerConfig, LoggingMiddleware,
    TimingMiddleware,
};
use event_dispatch_macros::event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// 事件
// ============================================================================

#[event(name = "order.placed")]
struct OrderPlaced {
    order_no: String,
    amount_cents: u64,
}

#[event(name = "order.notify")]
struct NotifyCustomer {
    order_no: String,
}

// ============================================================================
// 处理器
// ============================================================================

struct Fulfilment;

#[async_trait]
impl EventHandler<OrderPlaced> for Fulfilment {
    async fn handle(
        &self,
        event: &OrderPlaced,
        _token: &CancellationToken,
    ) -> AnyResult<HandlerResult> {
        println!("📦 fulfilling {} ({} cents)", event.order_no, event.amount_cents);
        Ok(HandlerResult::success(Some(format!("reserved {}", event.order_no)), None))
    }
}

/// 邮件服务在 `online` 打开之前一直不可用
struct Mailer {
    online: AtomicBool,
}

#[async_trait]
impl EventHandler<NotifyCustomer> for Mailer {
    async fn handle(
        &self,
        event: &NotifyCustomer,
        _token: &CancellationToken,
    ) -> AnyResult<HandlerResult> {
        if !self.online.load(Ordering::SeqCst) {
            anyhow::bail!("smtp relay unreachable");
        }
        println!("✉️  notified customer of {}", event.order_no);
        Ok(HandlerResult::ok())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let host = DispatcherHost::builder()
        .config(
            ListenerConfig::builder()
                .max_retries(2)
                .base_backoff(Duration::from_millis(20))
                .build(),
        )
        .build();

    let mailer = Arc::new(Mailer {
        online: AtomicBool::new(false),
    });
    host.register::<OrderPlaced, _>(
        Arc::new(Fulfilment),
        vec![Arc::new(LoggingMiddleware), Arc::new(TimingMiddleware)],
    )
    .register::<NotifyCustomer, _>(mailer.clone(), vec![]);

    // 1) 等待结果的投递
    let result = host
        .enqueue_async(
            OrderPlaced {
                meta: EventMeta::new(),
                order_no: "SO-1001".into(),
                amount_cents: 4200,
            },
            &CancellationToken::new(),
        )
        .await;
    println!(
        "order result: success={}, message={:?}, metadata={:?}",
        result.is_success(),
        result.message(),
        result.metadata()
    );

    // 2) 通知失败：重试 2 次后进入死信
    let result = host
        .enqueue_async(
            NotifyCustomer {
                meta: EventMeta::new(),
                order_no: "SO-1001".into(),
            },
            &CancellationToken::new(),
        )
        .await;
    println!("notify result: {:?}", result.message());

    let letters = host.dead_letters().await?;
    for letter in &letters {
        println!(
            "☠️  dead letter {} [{}] v{}: {}",
            letter.event_id, letter.event_type, letter.schema_version, letter.payload
        );
    }

    // 3) 邮件服务恢复后，从死信还原并重新投递
    mailer.online.store(true, Ordering::SeqCst);
    let redelivered = host.redeliver_dead_letters().await?;
    println!("redelivered {redelivered} dead letter(s)");
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("metrics: {:?}", host.metrics().snapshot());
    host.shutdown().await;
    Ok(())
}
