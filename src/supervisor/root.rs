use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::health::HealthRegistry;
use super::reconcile::reconcile;
use super::stream::{StreamContext, StreamSupervisor};
use crate::adapters::{MarketFeed, Notification, Notifier};
use crate::config::AppConfig;
use crate::error::{Result, WardenError};
use crate::exchange::{OrderGateway, RetryPolicy, TradingApi};
use crate::persistence::{PositionSnapshotStore, TradeLedger};
use crate::strategy::{
    DailyGoalGovernor, Executor, ExecutorDeps, ForecastProvider, PositionStore, RiskGate,
    SignalScorer,
};

const GOVERNOR_TICK: Duration = Duration::from_secs(5);

/// External collaborators the supervisor is built from
pub struct Collaborators {
    pub api: Arc<dyn TradingApi>,
    pub feed: Arc<dyn MarketFeed>,
    pub scorer: Arc<dyn SignalScorer>,
    pub forecasts: Arc<dyn ForecastProvider>,
    pub notifier: Arc<dyn Notifier>,
}

/// Root of the task tree: one stream per instrument plus reconciliation,
/// snapshot and governor housekeeping tasks.
pub struct Supervisor {
    config: AppConfig,
    executor: Arc<Executor>,
    feed: Arc<dyn MarketFeed>,
    scorer: Arc<dyn SignalScorer>,
    notifier: Arc<dyn Notifier>,
    health: Arc<HealthRegistry>,
    snapshots: Arc<PositionSnapshotStore>,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Wire the engine. Fails when the account cannot be read.
    pub async fn build(
        config: AppConfig,
        parts: Collaborators,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let gateway = Arc::new(OrderGateway::new(
            parts.api,
            config.exchange.quote_asset.clone(),
            RetryPolicy::from_config(&config.retry),
            Duration::from_millis(config.exchange.call_timeout_ms),
        ));
        if let Err(e) = gateway.resync_clock().await {
            warn!(error = %e, "initial clock sync failed, signing with local time");
        }

        let positions = Arc::new(PositionStore::new());
        let risk = Arc::new(RiskGate::new(&config.risk, positions.clone()));
        let ledger = Arc::new(TradeLedger::new(config.persistence.ledger_path()));
        let snapshots = Arc::new(PositionSnapshotStore::new(config.persistence.snapshot_path()));

        let today = Utc::now().date_naive();
        let equity = account_equity(&gateway, &config.symbols()).await?;
        let closed_today = ledger.records_on(today).await.unwrap_or_else(|e| {
            warn!(error = %e, "ledger unreadable, daily P&L starts at zero");
            Vec::new()
        });
        let realized_today: Decimal = closed_today.iter().map(|r| r.realized_pnl).sum();
        let governor = Arc::new(DailyGoalGovernor::new(
            config.governor.clone(),
            equity - realized_today,
            today,
        ));
        if !closed_today.is_empty() {
            governor.replay(&closed_today).await;
        }

        let executor = Executor::new(
            &config,
            ExecutorDeps {
                gateway,
                positions,
                risk,
                governor,
                ledger,
                forecasts: parts.forecasts,
                notifier: parts.notifier.clone(),
            },
            shutdown.clone(),
        );

        Ok(Self {
            config,
            executor,
            feed: parts.feed,
            scorer: parts.scorer,
            notifier: parts.notifier,
            health: Arc::new(HealthRegistry::new()),
            snapshots,
            shutdown,
        })
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled, then drain and snapshot
    pub async fn run(self) -> Result<()> {
        let symbols = self.config.symbols();
        info!(instruments = ?symbols, dry_run = self.executor.gateway().is_dry_run(), "supervisor starting");
        match self.reconcile_startup().await {
            Ok(()) => {}
            Err(WardenError::Cancelled) => {
                info!("shutdown requested during startup reconciliation");
                self.executor.wait_idle().await;
                return Ok(());
            }
            Err(e) => {
                self.shutdown.cancel();
                self.executor.wait_idle().await;
                return Err(e);
            }
        }

        let background = TaskTracker::new();
        background.spawn(snapshot_loop(
            self.executor.positions().clone(),
            self.snapshots.clone(),
            Duration::from_secs(self.config.persistence.snapshot_interval_secs.max(1)),
            self.shutdown.clone(),
        ));
        background.spawn(governor_loop(
            self.executor.clone(),
            self.notifier.clone(),
            symbols.clone(),
            self.shutdown.clone(),
        ));

        let ctx = StreamContext {
            executor: self.executor.clone(),
            feed: self.feed.clone(),
            scorer: self.scorer.clone(),
            health: self.health.clone(),
            notifier: self.notifier.clone(),
        };
        let mut streams = JoinSet::new();
        for symbol in &symbols {
            let stream = StreamSupervisor::new(symbol.clone(), ctx.clone(), &self.config);
            let token = self.shutdown.clone();
            streams.spawn(async move {
                let instrument = stream.instrument().to_string();
                (instrument, stream.run(token).await)
            });
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(joined) = streams.join_next() => log_stream_exit(joined),
            }
        }

        info!("shutdown requested, draining tasks");
        while let Some(joined) = streams.join_next().await {
            log_stream_exit(joined);
        }
        background.close();
        background.wait().await;
        self.executor.wait_idle().await;

        let open = self.executor.positions().snapshot();
        self.snapshots.save(&open).await?;
        info!(open_positions = open.len(), "supervisor stopped");
        Ok(())
    }
}

impl Supervisor {
    /// Adopt exchange balances before any stream can enter. Retried with
    /// backoff; the last error is returned once attempts run out.
    async fn reconcile_startup(&self) -> Result<()> {
        let saved = match self.snapshots.load().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "snapshot unreadable, reconciling from exchange only");
                None
            }
        };
        let policy = RetryPolicy::from_config(&self.config.retry);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match reconcile(&self.executor, saved.clone(), &self.config.instruments).await {
                Ok(report) => {
                    debug!(attempt, adopted = report.adopted.len(), "startup reconciliation done");
                    return Ok(());
                }
                Err(e) if attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "startup reconciliation failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(WardenError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "startup reconciliation failed, not starting streams");
                    return Err(e);
                }
            }
        }
    }
}

fn log_stream_exit(joined: std::result::Result<(String, Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((instrument, Ok(()))) => debug!(instrument = %instrument, "stream task finished"),
        Ok((instrument, Err(WardenError::StreamDegraded { attempts, .. }))) => {
            error!(instrument = %instrument, attempts, "stream degraded, other instruments keep trading")
        }
        Ok((instrument, Err(e))) => error!(instrument = %instrument, error = %e, "stream task failed"),
        Err(e) => error!(error = %e, "stream task panicked"),
    }
}

/// Quote balance plus configured base balances valued at the ticker
pub async fn account_equity(gateway: &OrderGateway, symbols: &[String]) -> Result<Decimal> {
    let account = gateway.account().await?;
    let mut equity = account.total(gateway.quote_asset());
    for symbol in symbols {
        let filters = match gateway.symbol_precision(symbol).await {
            Ok(f) => f,
            Err(e) => {
                warn!(instrument = %symbol, error = %e, "equity: no symbol info");
                continue;
            }
        };
        let held = account.total(&filters.base_asset);
        if held.is_zero() {
            continue;
        }
        match gateway.ticker(symbol).await {
            Ok(price) => equity += held * price,
            Err(e) => warn!(instrument = %symbol, error = %e, "equity: no price, balance ignored"),
        }
    }
    Ok(equity)
}

async fn snapshot_loop(
    positions: Arc<PositionStore>,
    snapshots: Arc<PositionSnapshotStore>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = snapshots.save(&positions.snapshot()).await {
                    error!(error = %e, "position snapshot failed");
                }
            }
        }
    }
}

/// Applies decision timeouts and rolls the daily goal at UTC midnight
async fn governor_loop(
    executor: Arc<Executor>,
    notifier: Arc<dyn Notifier>,
    symbols: Vec<String>,
    shutdown: CancellationToken,
) {
    let governor = executor.governor().clone();
    let mut ticker = tokio::time::interval(GOVERNOR_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Utc::now();

        let before = governor.band().await;
        if let Some(band) = governor.tick(now).await {
            let state = governor.state().await;
            notifier.notify(Notification::GovernorBand {
                from: before.to_string(),
                to: band.to_string(),
                realized_pnl: state.realized_pnl_today,
            });
        }

        let today = now.date_naive();
        if today > governor.day().await {
            match account_equity(executor.gateway(), &symbols).await {
                Ok(equity) => {
                    governor.roll_day(today, equity).await;
                }
                Err(e) => warn!(error = %e, "day rollover postponed, equity unavailable"),
            }
        }
    }
}
