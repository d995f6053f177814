mod common;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{
    harness, instrument, rising_ticks, test_config, Harness, MockExchange, ScriptedFeed,
};
use warden::adapters::{MarketFeed, Notification, TickStream};
use warden::domain::{Lifecycle, VolatilityClass};
use warden::error::{Result, WardenError};
use warden::strategy::MomentumScorer;
use warden::supervisor::{HealthRegistry, StreamContext, StreamStatus, StreamSupervisor};

/// Every subscription fails
#[derive(Default)]
struct RefusingFeed {
    attempts: AtomicUsize,
}

#[async_trait]
impl MarketFeed for RefusingFeed {
    async fn subscribe(&self, _instrument: &str) -> Result<TickStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(WardenError::MarketDataUnavailable("connection refused".into()))
    }
}

fn context(h: &Harness, feed: Arc<dyn MarketFeed>) -> StreamContext {
    StreamContext {
        executor: h.executor.clone(),
        feed,
        scorer: Arc::new(MomentumScorer::from_config(&h.config.signal)),
        health: Arc::new(HealthRegistry::new()),
        notifier: h.notifier.clone(),
    }
}

fn setup() -> (TempDir, Harness) {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, vec![instrument("ETHUSDT", VolatilityClass::Mid)]);
    config.stream.reconnect_base_secs = 1;
    config.stream.reconnect_max_secs = 4;
    config.stream.max_reconnect_attempts = 3;
    let exchange = MockExchange::new()
        .with_instrument("ETHUSDT", "ETH", dec!(0.001), dec!(10), dec!(110))
        .with_balance("USDT", dec!(10000));
    let h = harness(config, exchange, dec!(10000));
    (dir, h)
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_degrade_the_stream() {
    let (_dir, h) = setup();
    let feed = Arc::new(RefusingFeed::default());
    let ctx = context(&h, feed.clone());
    let health = ctx.health.clone();

    let supervisor = StreamSupervisor::new("ETHUSDT", ctx, &h.config);
    assert_eq!(supervisor.backoff(1), Duration::from_secs(1));
    assert_eq!(supervisor.backoff(3), Duration::from_secs(4));
    assert_eq!(supervisor.backoff(10), Duration::from_secs(4));

    let result = supervisor.run(h.shutdown.clone()).await;
    assert!(matches!(
        result,
        Err(WardenError::StreamDegraded { attempts: 3, .. })
    ));
    // first connection plus three retries
    assert_eq!(feed.attempts.load(Ordering::SeqCst), 4);

    let status = health.get("ETHUSDT").await.unwrap();
    assert_eq!(status.status, StreamStatus::Degraded);
    assert!(!health.is_tradable("ETHUSDT").await);
    assert!(h.notifier.events().iter().any(|e| matches!(
        e,
        Notification::StreamDegraded { instrument, attempts: 3 } if instrument == "ETHUSDT"
    )));
}

#[tokio::test]
async fn rising_ticks_open_a_position_and_shutdown_is_clean() {
    let (_dir, h) = setup();
    let feed = Arc::new(ScriptedFeed::default());
    feed.push(rising_ticks("ETHUSDT", dec!(0.5)));
    let ctx = context(&h, feed);
    let health = ctx.health.clone();

    let supervisor = StreamSupervisor::new("ETHUSDT", ctx, &h.config);
    let task = tokio::spawn(supervisor.run(h.shutdown.clone()));

    let opened = tokio::time::timeout(Duration::from_secs(5), async {
        while h.executor.lifecycle("ETHUSDT") != Lifecycle::Open {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(opened.is_ok(), "no position opened from the tick stream");
    assert_eq!(h.exchange.buy_count(), 1);

    h.shutdown.cancel();
    let result = task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(
        health.get("ETHUSDT").await.unwrap().status,
        StreamStatus::Stopped
    );
}
