mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use common::{harness, instrument, test_config, MockExchange};
use warden::domain::{Lifecycle, Position, VolatilityClass};
use warden::persistence::PositionSnapshotStore;
use warden::supervisor::{reconcile, ADOPTED_TAG};

fn exchange() -> MockExchange {
    MockExchange::new()
        .with_instrument("ETHUSDT", "ETH", dec!(0.001), dec!(10), dec!(100))
        .with_instrument("SOLUSDT", "SOL", dec!(0.01), dec!(10), dec!(10))
        .with_instrument("BTCUSDT", "BTC", dec!(0.00001), dec!(10), dec!(50000))
        .with_balance("USDT", dec!(1000))
        .with_balance("ETH", dec!(2.5))
        .with_balance("SOL", dec!(0.5))
}

fn saved(symbol: &str, base: &str, qty: rust_decimal::Decimal, entry: rust_decimal::Decimal) -> Position {
    Position::new(
        symbol,
        base,
        VolatilityClass::Major,
        qty,
        entry,
        entry,
        entry * dec!(0.95),
        entry * dec!(1.1),
        "momentum",
        Utc::now(),
    )
}

#[tokio::test]
async fn snapshot_entries_are_adopted_trimmed_or_dropped() {
    let dir = TempDir::new().unwrap();
    let config = test_config(
        &dir,
        vec![
            instrument("ETHUSDT", VolatilityClass::Major),
            instrument("SOLUSDT", VolatilityClass::High),
            instrument("BTCUSDT", VolatilityClass::Major),
        ],
    );
    let snapshots = PositionSnapshotStore::new(config.persistence.snapshot_path());
    snapshots
        .save(&[
            saved("ETHUSDT", "ETH", dec!(3), dec!(90)),
            saved("BTCUSDT", "BTC", dec!(0.01), dec!(48000)),
            saved("DOGEUSDT", "DOGE", dec!(1000), dec!(0.1)),
        ])
        .await
        .unwrap();

    let h = harness(config, exchange(), dec!(1000));
    let snapshot = snapshots.load().await.unwrap();
    let report = reconcile(&h.executor, snapshot, &h.config.instruments)
        .await
        .unwrap();

    assert_eq!(report.adopted, vec!["ETHUSDT".to_string()]);
    assert_eq!(report.dust, vec!["SOLUSDT".to_string()]);
    assert!(report.dropped.contains(&"BTCUSDT".to_string()));
    assert!(report.dropped.contains(&"DOGEUSDT".to_string()));

    let eth = h.executor.positions().get("ETHUSDT").unwrap();
    // never more than the exchange balance
    assert_eq!(eth.quantity, dec!(2.5));
    assert_eq!(eth.entry_price_with_fee, dec!(90));
    assert_eq!(eth.strategy_tag, "momentum");
    assert_eq!(h.executor.lifecycle("ETHUSDT"), Lifecycle::Open);
    assert_eq!(h.executor.lifecycle("SOLUSDT"), Lifecycle::None);
    assert_eq!(h.executor.monitor_count(), 1);
    assert_eq!(h.exchange.sell_count(), 0);
}

#[tokio::test]
async fn unknown_balance_is_adopted_at_current_price() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, vec![instrument("ETHUSDT", VolatilityClass::Major)]);
    let h = harness(config, exchange(), dec!(1000));

    let report = reconcile(&h.executor, None, &h.config.instruments)
        .await
        .unwrap();
    assert_eq!(report.adopted, vec!["ETHUSDT".to_string()]);
    assert!(report.dropped.is_empty());

    let eth = h.executor.positions().get("ETHUSDT").unwrap();
    assert_eq!(eth.strategy_tag, ADOPTED_TAG);
    assert_eq!(eth.entry_price_with_fee, dec!(100));
    assert_eq!(eth.stop_loss_price, dec!(97));
    assert_eq!(eth.take_profit_price, dec!(104));
    assert_eq!(eth.category, VolatilityClass::Major);
}

#[tokio::test]
async fn held_position_is_not_adopted_twice() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, vec![instrument("ETHUSDT", VolatilityClass::Major)]);
    let h = harness(config, exchange(), dec!(1000));

    reconcile(&h.executor, None, &h.config.instruments)
        .await
        .unwrap();
    let second = reconcile(&h.executor, None, &h.config.instruments)
        .await
        .unwrap();
    assert!(second.adopted.is_empty());
    assert_eq!(h.executor.positions().len(), 1);
    assert_eq!(h.executor.monitor_count(), 1);
}
