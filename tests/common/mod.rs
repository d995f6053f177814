#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use warden::adapters::{MarketFeed, Notification, Notifier, TickStream};
use warden::config::{AppConfig, InstrumentConfig};
use warden::domain::{
    AccountSnapshot, AssetBalance, BuyAmount, ExchangeFill, ExchangeOrder, OrderSide,
    SymbolFilters, Tick, VolatilityClass,
};
use warden::error::{ExchangeError, Result};
use warden::exchange::{ExchangeResult, OrderGateway, RetryPolicy, TradingApi};
use warden::persistence::TradeLedger;
use warden::strategy::{
    DailyGoalGovernor, Executor, ExecutorDeps, NoForecast, PositionStore, RiskGate,
};

/// Scripted exchange: fixed prices, in-memory balances, quote-asset fees
pub struct MockExchange {
    filters: Mutex<HashMap<String, SymbolFilters>>,
    prices: Mutex<HashMap<String, Decimal>>,
    balances: Mutex<BTreeMap<String, Decimal>>,
    fee_rate: Decimal,
    buy_delay: Mutex<Duration>,
    sell_delay: Mutex<Duration>,
    reject_buys: AtomicBool,
    failing_accounts: AtomicUsize,
    buys: AtomicUsize,
    sells: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            filters: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            balances: Mutex::new(BTreeMap::new()),
            fee_rate: dec!(0.001),
            buy_delay: Mutex::new(Duration::ZERO),
            sell_delay: Mutex::new(Duration::ZERO),
            reject_buys: AtomicBool::new(false),
            failing_accounts: AtomicUsize::new(0),
            buys: AtomicUsize::new(0),
            sells: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_instrument(
        self,
        symbol: &str,
        base: &str,
        qty_step: Decimal,
        min_notional: Decimal,
        price: Decimal,
    ) -> Self {
        self.filters.lock().unwrap().insert(
            symbol.to_string(),
            SymbolFilters {
                symbol: symbol.to_string(),
                base_asset: base.to_string(),
                quote_asset: "USDT".to_string(),
                qty_step,
                price_step: dec!(0.01),
                min_qty: qty_step,
                min_notional,
            },
        );
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
        self
    }

    pub fn with_balance(self, asset: &str, amount: Decimal) -> Self {
        self.set_balance(asset, amount);
        self
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), amount);
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_buy_delay(&self, delay: Duration) {
        *self.buy_delay.lock().unwrap() = delay;
    }

    pub fn set_sell_delay(&self, delay: Duration) {
        *self.sell_delay.lock().unwrap() = delay;
    }

    pub fn reject_buys(&self) {
        self.reject_buys.store(true, Ordering::SeqCst);
    }

    /// The next `n` account reads fail with a permission error
    pub fn fail_accounts(&self, n: usize) {
        self.failing_accounts.store(n, Ordering::SeqCst);
    }

    pub fn failing_accounts(&self) -> usize {
        self.failing_accounts.load(Ordering::SeqCst)
    }

    pub fn buy_count(&self) -> usize {
        self.buys.load(Ordering::SeqCst)
    }

    pub fn sell_count(&self) -> usize {
        self.sells.load(Ordering::SeqCst)
    }

    fn price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Api {
                code: -1121,
                message: "Invalid symbol.".to_string(),
            })
    }

    fn base_of(&self, symbol: &str) -> ExchangeResult<String> {
        self.filters
            .lock()
            .unwrap()
            .get(symbol)
            .map(|f| f.base_asset.clone())
            .ok_or_else(|| ExchangeError::Api {
                code: -1121,
                message: "Invalid symbol.".to_string(),
            })
    }

    fn fill(&self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> ExchangeOrder {
        let quote = qty * price;
        ExchangeOrder {
            order_id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            symbol: symbol.to_string(),
            side,
            executed_qty: qty,
            cumulative_quote_qty: quote,
            fills: vec![ExchangeFill {
                price,
                qty,
                commission: quote * self.fee_rate,
                commission_asset: "USDT".to_string(),
            }],
            transact_time: Utc::now(),
        }
    }
}

#[async_trait]
impl TradingApi for MockExchange {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        self.filters
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::Api {
                code: -1121,
                message: "Invalid symbol.".to_string(),
            })
    }

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.price(symbol)
    }

    async fn market_buy(&self, symbol: &str, amount: BuyAmount) -> ExchangeResult<ExchangeOrder> {
        let delay = *self.buy_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.reject_buys.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected(
                "Account has insufficient balance for requested action.".to_string(),
            ));
        }
        let price = self.price(symbol)?;
        let base = self.base_of(symbol)?;
        let qty = match amount {
            BuyAmount::Quantity(q) => q,
            BuyAmount::Notional(n) => n / price,
        };
        self.buys.fetch_add(1, Ordering::SeqCst);
        let order = self.fill(symbol, OrderSide::Buy, qty, price);
        let cost = order.cumulative_quote_qty + order.fills[0].commission;
        let mut balances = self.balances.lock().unwrap();
        *balances.entry("USDT".to_string()).or_default() -= cost;
        *balances.entry(base).or_default() += qty;
        Ok(order)
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<ExchangeOrder> {
        let delay = *self.sell_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let price = self.price(symbol)?;
        let base = self.base_of(symbol)?;
        self.sells.fetch_add(1, Ordering::SeqCst);
        let order = self.fill(symbol, OrderSide::Sell, quantity, price);
        let proceeds = order.cumulative_quote_qty - order.fills[0].commission;
        let mut balances = self.balances.lock().unwrap();
        *balances.entry("USDT".to_string()).or_default() += proceeds;
        *balances.entry(base).or_default() -= quantity;
        Ok(order)
    }

    async fn account(&self) -> ExchangeResult<AccountSnapshot> {
        let failing = self
            .failing_accounts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ExchangeError::Api {
                code: -2015,
                message: "Invalid API-key, IP, or permissions for action.".to_string(),
            });
        }
        let balances = self
            .balances
            .lock()
            .unwrap()
            .iter()
            .map(|(asset, free)| {
                (
                    asset.clone(),
                    AssetBalance {
                        free: *free,
                        locked: Decimal::ZERO,
                    },
                )
            })
            .collect();
        Ok(AccountSnapshot {
            balances,
            taken_at: Some(Utc::now()),
        })
    }

    async fn server_time(&self) -> ExchangeResult<i64> {
        Ok(Utc::now().timestamp_millis())
    }
}

/// Plays one scripted batch of ticks per subscription, then stays silent
#[derive(Default)]
pub struct ScriptedFeed {
    scripts: Mutex<VecDeque<Vec<Tick>>>,
    subscriptions: AtomicUsize,
}

impl ScriptedFeed {
    pub fn push(&self, ticks: Vec<Tick>) {
        self.scripts.lock().unwrap().push_back(ticks);
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketFeed for ScriptedFeed {
    async fn subscribe(&self, _instrument: &str) -> Result<TickStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().unwrap().pop_front() {
            Some(ticks) => Ok(stream::iter(ticks.into_iter().map(Ok)).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Twenty ticks climbing from 100 by `step`
pub fn rising_ticks(symbol: &str, step: Decimal) -> Vec<Tick> {
    (0..20)
        .map(|i| Tick::new(symbol, dec!(100) + Decimal::from(i) * step, Utc::now()))
        .collect()
}

/// Keeps every notification for assertions
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Notification) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn instrument(symbol: &str, category: VolatilityClass) -> InstrumentConfig {
    InstrumentConfig {
        symbol: symbol.to_string(),
        category,
    }
}

/// Defaults with no cooldown, slow monitors, and data under `dir`
pub fn test_config(dir: &TempDir, instruments: Vec<InstrumentConfig>) -> AppConfig {
    let mut config = AppConfig::default();
    config.instruments = instruments;
    config.risk.cooldown_secs = 0;
    config.exit.monitor_interval_secs = 3600;
    config.persistence.data_dir = dir.path().to_path_buf();
    config
}

pub struct Harness {
    pub executor: Arc<Executor>,
    pub exchange: Arc<MockExchange>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<TradeLedger>,
    pub shutdown: CancellationToken,
    pub config: AppConfig,
}

/// Executor wired to the mock exchange; the governor starts from `equity`
pub fn harness(config: AppConfig, exchange: MockExchange, equity: Decimal) -> Harness {
    let exchange = Arc::new(exchange);
    let notifier = Arc::new(RecordingNotifier::default());
    let gateway = Arc::new(OrderGateway::new(
        exchange.clone(),
        "USDT",
        RetryPolicy::no_retry(),
        Duration::from_secs(5),
    ));
    let positions = Arc::new(PositionStore::new());
    let ledger = Arc::new(TradeLedger::new(config.persistence.ledger_path()));
    let shutdown = CancellationToken::new();
    let executor = Executor::new(
        &config,
        ExecutorDeps {
            gateway,
            risk: Arc::new(RiskGate::new(&config.risk, positions.clone())),
            positions,
            governor: Arc::new(DailyGoalGovernor::new(
                config.governor.clone(),
                equity,
                Utc::now().date_naive(),
            )),
            ledger: ledger.clone(),
            forecasts: Arc::new(NoForecast),
            notifier: notifier.clone(),
        },
        shutdown.clone(),
    );
    Harness {
        executor,
        exchange,
        notifier,
        ledger,
        shutdown,
        config,
    }
}

/// Twenty prices alternating around 100 (population std dev 1.5)
pub fn choppy_window() -> Vec<Decimal> {
    (0..20)
        .map(|i| if i % 2 == 0 { dec!(98.5) } else { dec!(101.5) })
        .collect()
}
