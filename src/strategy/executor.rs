//! Position lifecycle: gated entry, per-position exit monitoring, and closing.
//!
//! Every instrument moves through `None -> Opening -> Open -> Closing -> Closed -> None`.
//! The state is checked and set atomically before any exchange call, so at most
//! one open or close is in flight per instrument.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::exit::{ExitAction, ExitDecision, ExitPolicy};
use super::governor::{DailyGoalGovernor, GovernorAction};
use super::positions::PositionStore;
use super::risk::{RiskGate, RiskReason};
use super::signal::{forecast_or_none, ForecastProvider};
use super::sizing::PositionSizer;
use crate::adapters::{Notification, Notifier};
use crate::config::AppConfig;
use crate::domain::{
    BuyAmount, ClosedTradeRecord, ExitReason, Lifecycle, OrderOutcome, Position, Signal,
    SkipReason, SymbolFilters, Urgency, VolatilityClass,
};
use crate::error::{Result, WardenError};
use crate::exchange::OrderGateway;
use crate::persistence::TradeLedger;

/// Result of an entry attempt. Everything except `Opened` leaves the instrument in `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(Position),
    /// Signal was not a BUY
    NoSignal,
    Rejected(RiskReason),
    GovernorVeto,
    Skipped(SkipReason),
    /// Sizer returned zero (flat market or no balance)
    ZeroSize,
    /// Another open/close is in flight or a position is already held
    Busy,
}

/// Result of an exit attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    Hold,
    NoPosition,
    Busy,
    Skipped(SkipReason),
    /// Full sale refused by the exchange minimums; the balance is left as dust
    Released(SkipReason),
    Sold(ClosedTradeRecord),
}

/// Quantity and bookkeeping for one sell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalePlan {
    pub quantity: Decimal,
    pub reason: ExitReason,
    pub full_close: bool,
}

/// Shared collaborators handed to the executor
pub struct ExecutorDeps {
    pub gateway: Arc<OrderGateway>,
    pub positions: Arc<PositionStore>,
    pub risk: Arc<RiskGate>,
    pub governor: Arc<DailyGoalGovernor>,
    pub ledger: Arc<TradeLedger>,
    pub forecasts: Arc<dyn ForecastProvider>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Executor {
    gateway: Arc<OrderGateway>,
    positions: Arc<PositionStore>,
    risk: Arc<RiskGate>,
    governor: Arc<DailyGoalGovernor>,
    ledger: Arc<TradeLedger>,
    forecasts: Arc<dyn ForecastProvider>,
    notifier: Arc<dyn Notifier>,
    sizer: PositionSizer,
    policy: ExitPolicy,
    max_position_fraction: Decimal,
    categories: HashMap<String, VolatilityClass>,
    forecast_timeout: Duration,
    monitor_interval: Duration,
    lifecycle: DashMap<String, Lifecycle>,
    monitors: DashMap<String, CancellationToken>,
    /// Last urgency seen per instrument, to log escalations once
    urgency: DashMap<String, Urgency>,
    /// Serializes the ceiling check with the `None -> Opening` reservation
    entry_gate: Mutex<()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Executor {
    pub fn new(config: &AppConfig, deps: ExecutorDeps, shutdown: CancellationToken) -> Arc<Self> {
        let categories = config
            .instruments
            .iter()
            .map(|i| (i.symbol.clone(), i.category))
            .collect();
        Arc::new(Self {
            gateway: deps.gateway,
            positions: deps.positions,
            risk: deps.risk,
            governor: deps.governor,
            ledger: deps.ledger,
            forecasts: deps.forecasts,
            notifier: deps.notifier,
            sizer: PositionSizer::from_config(&config.sizing),
            policy: ExitPolicy::new(config.exit.clone()),
            max_position_fraction: config.sizing.max_position_fraction,
            categories,
            forecast_timeout: Duration::from_millis(config.signal.forecast_timeout_ms),
            monitor_interval: Duration::from_secs(config.exit.monitor_interval_secs.max(1)),
            lifecycle: DashMap::new(),
            monitors: DashMap::new(),
            urgency: DashMap::new(),
            entry_gate: Mutex::new(()),
            shutdown,
            tasks: TaskTracker::new(),
        })
    }

    pub fn positions(&self) -> &Arc<PositionStore> {
        &self.positions
    }

    pub fn governor(&self) -> &Arc<DailyGoalGovernor> {
        &self.governor
    }

    pub fn gateway(&self) -> &Arc<OrderGateway> {
        &self.gateway
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    pub fn lifecycle(&self, instrument: &str) -> Lifecycle {
        self.lifecycle
            .get(instrument)
            .map(|s| *s)
            .unwrap_or(Lifecycle::None)
    }

    pub fn category(&self, instrument: &str) -> VolatilityClass {
        self.categories
            .get(instrument)
            .copied()
            .unwrap_or(VolatilityClass::Mid)
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Entries reserved in `Opening` whose position is not in the store yet
    fn pending_entries(&self) -> usize {
        self.lifecycle
            .iter()
            .filter(|e| *e.value() == Lifecycle::Opening && !self.positions.contains(e.key()))
            .count()
    }

    /// Compare-and-set on the lifecycle; `false` if the current state is not `from`
    fn transition(&self, instrument: &str, from: Lifecycle, to: Lifecycle) -> bool {
        if !from.can_transition_to(to) {
            error!(instrument, %from, %to, "illegal lifecycle transition requested");
            return false;
        }
        match self.lifecycle.entry(instrument.to_string()) {
            Entry::Occupied(mut slot) => {
                if *slot.get() != from {
                    return false;
                }
                slot.insert(to);
            }
            Entry::Vacant(slot) => {
                if from != Lifecycle::None {
                    return false;
                }
                slot.insert(to);
            }
        }
        debug!(instrument, %from, %to, "lifecycle");
        true
    }

    // ==================== Entry ====================

    /// Governor, risk gate, sizing, then a market buy. Any failure reverts to `None`.
    pub async fn enter(
        self: &Arc<Self>,
        instrument: &str,
        signal: &Signal,
        window: &[Decimal],
    ) -> Result<EntryOutcome> {
        if !signal.is_buy() {
            return Ok(EntryOutcome::NoSignal);
        }
        if !self.governor.allows_entries().await {
            debug!(instrument, "entry vetoed by daily goal governor");
            return Ok(EntryOutcome::GovernorVeto);
        }
        if self.lifecycle(instrument) != Lifecycle::None {
            return Ok(EntryOutcome::Busy);
        }

        {
            let _gate = self.entry_gate.lock().await;
            let verdict = self.risk.approve_with_pending(
                instrument,
                signal.confidence,
                self.pending_entries(),
                Utc::now(),
            );
            if !verdict.approved {
                return Ok(EntryOutcome::Rejected(verdict.reason));
            }
            if !self.transition(instrument, Lifecycle::None, Lifecycle::Opening) {
                return Ok(EntryOutcome::Busy);
            }
        }

        let result = self.open_position(instrument, signal, window).await;
        match &result {
            Ok(EntryOutcome::Opened(_)) => {}
            Ok(outcome) => {
                self.transition(instrument, Lifecycle::Opening, Lifecycle::None);
                info!(instrument, outcome = ?outcome, "entry abandoned, nothing opened");
            }
            Err(e) => {
                self.transition(instrument, Lifecycle::Opening, Lifecycle::None);
                error!(instrument, error = %e, "entry failed, nothing opened");
            }
        }
        result
    }

    async fn open_position(
        self: &Arc<Self>,
        instrument: &str,
        signal: &Signal,
        window: &[Decimal],
    ) -> Result<EntryOutcome> {
        let reference = match window.last() {
            Some(p) if *p > Decimal::ZERO => *p,
            _ => return Ok(EntryOutcome::ZeroSize),
        };
        let filters = self.gateway.symbol_precision(instrument).await?;
        let account = self.gateway.account().await?;
        let free_quote = account.free(self.gateway.quote_asset());

        let sized = self.sizer.quantity_for(window, free_quote, filters.qty_step);
        let cap = filters.floor_qty(free_quote * self.max_position_fraction / reference);
        let qty = sized.min(cap);
        if qty < sized {
            debug!(instrument, sized = %sized, cap = %cap, "size capped by balance fraction");
        }
        if qty <= Decimal::ZERO {
            info!(instrument, free_quote = %free_quote, "sized to zero, no trade");
            return Ok(EntryOutcome::ZeroSize);
        }

        let fill = match self.gateway.buy(instrument, BuyAmount::Quantity(qty)).await? {
            OrderOutcome::Filled(fill) => fill,
            OrderOutcome::Skipped(reason) => return Ok(EntryOutcome::Skipped(reason)),
        };

        let entry_price = fill.avg_price;
        let entry_with_fee = fill.effective_price();
        let (stop, target) = self.sizer.brackets_for(entry_price, window);
        let opened_at = Utc::now();
        let forecast = forecast_or_none(
            self.forecasts.as_ref(),
            instrument,
            entry_with_fee,
            opened_at,
            self.forecast_timeout,
        )
        .await;

        let position = Position::new(
            instrument,
            fill.base_asset.clone(),
            self.category(instrument),
            fill.net_qty,
            entry_price,
            entry_with_fee,
            stop,
            target,
            signal.strategy_tag.clone(),
            opened_at,
        )
        .with_forecast(forecast);

        self.positions.insert(position.clone())?;
        self.transition(instrument, Lifecycle::Opening, Lifecycle::Open);
        self.spawn_monitor(instrument);

        info!(
            instrument,
            qty = %position.quantity,
            entry = %entry_price,
            entry_with_fee = %entry_with_fee,
            stop = %stop,
            target = %target,
            strategy = %position.strategy_tag,
            has_forecast = position.forecast.is_some(),
            "position opened"
        );
        self.notifier.notify(Notification::PositionOpened {
            instrument: instrument.to_string(),
            quantity: position.quantity,
            entry_price: entry_with_fee,
            strategy_tag: position.strategy_tag.clone(),
        });
        Ok(EntryOutcome::Opened(position))
    }

    /// Take over a position found on the exchange at startup
    pub fn adopt(self: &Arc<Self>, position: Position) -> Result<()> {
        let instrument = position.instrument.clone();
        if !self.transition(&instrument, Lifecycle::None, Lifecycle::Open) {
            return Err(WardenError::InvalidStateTransition {
                instrument,
                from: self.lifecycle(&position.instrument).to_string(),
                to: Lifecycle::Open.to_string(),
            });
        }
        if let Err(e) = self.positions.insert(position.clone()) {
            self.lifecycle.insert(instrument, Lifecycle::None);
            return Err(e);
        }
        self.spawn_monitor(&instrument);
        info!(
            instrument = %instrument,
            qty = %position.quantity,
            entry = %position.entry_price_with_fee,
            strategy = %position.strategy_tag,
            "position adopted"
        );
        self.notifier.notify(Notification::PositionAdopted {
            instrument,
            quantity: position.quantity,
            entry_price: position.entry_price_with_fee,
        });
        Ok(())
    }

    // ==================== Monitoring ====================

    /// Poll the price every `monitor_interval` until the position closes or shutdown
    fn spawn_monitor(self: &Arc<Self>, instrument: &str) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.monitors.insert(instrument.to_string(), token.clone()) {
            previous.cancel();
        }
        let this = Arc::clone(self);
        let instrument = instrument.to_string();
        let period = self.monitor_interval;

        self.tasks.spawn(async move {
            debug!(instrument = %instrument, "exit monitor started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !this.positions.contains(&instrument) {
                    break;
                }
                match this.gateway.ticker(&instrument).await {
                    Ok(price) => {
                        if let Err(e) = this.evaluate(&instrument, price, Utc::now()).await {
                            warn!(instrument = %instrument, error = %e, "exit attempt failed, will retry");
                        }
                    }
                    Err(e) => {
                        warn!(instrument = %instrument, error = %e, "exit monitor price poll failed");
                    }
                }
            }
            debug!(instrument = %instrument, "exit monitor stopped");
        });
    }

    /// Update the high-water mark, run the exit policy, and act on its decision
    pub async fn evaluate(
        self: &Arc<Self>,
        instrument: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ExitOutcome> {
        let Some(position) = self.positions.update(instrument, |p| {
            p.update_high_water(price);
            p.clone()
        }) else {
            return Ok(ExitOutcome::NoPosition);
        };

        let decision = self.policy.evaluate(&position, price, now);
        self.track_urgency(&position, price, &decision);
        if decision.is_hold() {
            return Ok(ExitOutcome::Hold);
        }
        self.exit(instrument, decision).await
    }

    fn track_urgency(&self, position: &Position, price: Decimal, decision: &ExitDecision) {
        let previous = self
            .urgency
            .insert(position.instrument.clone(), decision.urgency);
        if decision.urgency == Urgency::Critical && previous != Some(Urgency::Critical) {
            warn!(
                instrument = %position.instrument,
                urgency = %decision.urgency,
                reason = %decision.reason,
                pnl_pct = %position.pnl_pct(price).round_dp(4),
                price = %price,
                "position flagged critical"
            );
        }
    }

    // ==================== Exit ====================

    /// Act on an exit decision. A second call while a close is in flight is a
    /// no-op (`Busy`); a call with no position is refused.
    pub async fn exit(self: &Arc<Self>, instrument: &str, decision: ExitDecision) -> Result<ExitOutcome> {
        if decision.is_hold() {
            return Ok(ExitOutcome::Hold);
        }
        if !self.positions.contains(instrument) {
            error!(
                instrument,
                reason = %decision.reason,
                "sell requested for instrument with no open position, refused"
            );
            return Ok(ExitOutcome::NoPosition);
        }
        if !self.transition(instrument, Lifecycle::Open, Lifecycle::Closing) {
            debug!(instrument, state = %self.lifecycle(instrument), "exit already in flight");
            return Ok(ExitOutcome::Busy);
        }

        let Some(position) = self.positions.get(instrument) else {
            error!(instrument, "position vanished while closing");
            self.transition(instrument, Lifecycle::Closing, Lifecycle::Closed);
            self.transition(instrument, Lifecycle::Closed, Lifecycle::None);
            return Ok(ExitOutcome::NoPosition);
        };

        let result = self.close_position(&position, decision).await;
        match &result {
            Ok(ExitOutcome::Sold(ClosedTradeRecord { full_close: true, .. }))
            | Ok(ExitOutcome::Released(_)) => {
                self.transition(instrument, Lifecycle::Closing, Lifecycle::Closed);
                self.transition(instrument, Lifecycle::Closed, Lifecycle::None);
            }
            Ok(_) => {
                self.transition(instrument, Lifecycle::Closing, Lifecycle::Open);
            }
            Err(e) => {
                self.transition(instrument, Lifecycle::Closing, Lifecycle::Open);
                error!(instrument, reason = %decision.reason, error = %e, "sell failed, position kept");
            }
        }

        if let Ok(ExitOutcome::Sold(record)) = &result {
            self.settle(record).await;
        }
        result
    }

    /// How much to sell for `decision`. Partial sales that would leave less
    /// than `minNotional` behind, or that are themselves unsellable, become
    /// full closes.
    pub fn plan_sale(
        position: &Position,
        filters: &SymbolFilters,
        price: Decimal,
        decision: &ExitDecision,
    ) -> SalePlan {
        let full = SalePlan {
            quantity: position.quantity,
            reason: decision.reason,
            full_close: true,
        };
        let fraction = match decision.action {
            ExitAction::PartialSell(f) => f,
            ExitAction::SellAll | ExitAction::Hold => return full,
        };

        let part = filters.floor_qty(position.quantity * fraction);
        let remainder = position.quantity - part;
        let unsellable = OrderGateway::check_order(filters, part, price).is_some();
        if unsellable || part >= position.quantity || remainder * price < filters.min_notional {
            debug!(
                instrument = %position.instrument,
                part = %part,
                remainder = %remainder,
                trigger = %decision.reason,
                "partial sale would leave dust, selling everything"
            );
            return SalePlan {
                reason: ExitReason::DustRemainder,
                ..full
            };
        }
        SalePlan {
            quantity: part,
            reason: decision.reason,
            full_close: false,
        }
    }

    async fn close_position(&self, position: &Position, decision: ExitDecision) -> Result<ExitOutcome> {
        let instrument = position.instrument.as_str();
        let filters = self.gateway.symbol_precision(instrument).await?;
        let price = self.gateway.ticker(instrument).await?;
        let plan = Self::plan_sale(position, &filters, price, &decision);

        let account_before = self.gateway.account().await.ok();
        let fill = match self.gateway.sell(instrument, plan.quantity).await? {
            OrderOutcome::Filled(fill) => fill,
            OrderOutcome::Skipped(reason) if plan.full_close => {
                self.release(instrument);
                warn!(
                    instrument,
                    %reason,
                    qty = %plan.quantity,
                    trigger = %decision.reason,
                    "position below exchange minimums, released as dust"
                );
                return Ok(ExitOutcome::Released(reason));
            }
            OrderOutcome::Skipped(reason) => {
                warn!(instrument, %reason, trigger = %decision.reason, "sell skipped, position kept");
                return Ok(ExitOutcome::Skipped(reason));
            }
        };
        let account_after = self.gateway.account().await.ok();

        let sold = fill.filled_qty.min(position.quantity);
        let exit_with_fee = fill.effective_price();
        let realized_pnl = (exit_with_fee - position.entry_price_with_fee) * sold;

        let mut full_close = plan.full_close || sold >= position.quantity;
        if !full_close {
            match self.positions.reduce(instrument, sold) {
                Ok(remaining) => {
                    if let Some(tier) = decision.tier {
                        self.positions.update(instrument, |p| p.record_sale(tier));
                    }
                    debug!(instrument, remaining = %remaining, "position reduced");
                }
                Err(e) => {
                    error!(instrument, error = %e, "partial sale emptied the position, closing");
                    full_close = true;
                }
            }
        }
        if full_close {
            self.release(instrument);
        }

        let record = ClosedTradeRecord {
            id: Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            instrument: instrument.to_string(),
            strategy_tag: position.strategy_tag.clone(),
            quantity: sold,
            entry_price_with_fee: position.entry_price_with_fee,
            exit_price_with_fee: exit_with_fee,
            realized_pnl,
            reason: plan.reason,
            full_close,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
            account_before,
            account_after,
        };
        if let Err(e) = self.ledger.append(&record).await {
            error!(instrument, record_id = %record.id, error = %e, "failed to append closed trade to ledger");
        }

        info!(
            instrument,
            qty = %sold,
            exit_with_fee = %exit_with_fee,
            pnl = %realized_pnl,
            reason = %plan.reason,
            full_close,
            "position closed"
        );
        self.notifier.notify(Notification::PositionClosed {
            instrument: instrument.to_string(),
            quantity: sold,
            exit_price: exit_with_fee,
            realized_pnl,
            reason: plan.reason,
            full_close,
        });
        Ok(ExitOutcome::Sold(record))
    }

    /// Drop the position from management and stop its monitor
    fn release(&self, instrument: &str) {
        self.positions.remove(instrument);
        if let Some((_, token)) = self.monitors.remove(instrument) {
            token.cancel();
        }
        self.urgency.remove(instrument);
    }

    /// Feed realized P&L to the governor and react to band changes
    async fn settle(self: &Arc<Self>, record: &ClosedTradeRecord) {
        let before = self.governor.band().await;
        let action = self.governor.update(record.realized_pnl).await;
        let state = self.governor.state().await;
        if state.band != before {
            self.notifier.notify(Notification::GovernorBand {
                from: before.to_string(),
                to: state.band.to_string(),
                realized_pnl: state.realized_pnl_today,
            });
        }
        if action == GovernorAction::ForceLiquidate {
            self.tasks.spawn(self.liquidate_all(ExitReason::GoalLiquidation));
        }
    }

    /// Sell every open position; returns how many were fully closed
    pub fn liquidate_all(self: &Arc<Self>, reason: ExitReason) -> BoxFuture<'static, usize> {
        let this = Arc::clone(self);
        async move {
            let decision = ExitDecision::sell_all(reason, Urgency::Critical);
            let mut closed = 0;
            for position in this.positions.snapshot() {
                let instrument = position.instrument.as_str();
                let mut outcome = this.exit(instrument, decision).await;
                if matches!(outcome, Ok(ExitOutcome::Busy)) {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    outcome = this.exit(instrument, decision).await;
                }
                match outcome {
                    Ok(ExitOutcome::Sold(record)) if record.full_close => closed += 1,
                    Ok(ExitOutcome::Released(_)) => closed += 1,
                    Ok(other) => {
                        warn!(instrument, outcome = ?other, "liquidation left position open")
                    }
                    Err(e) => error!(instrument, error = %e, "liquidation sell failed"),
                }
            }
            warn!(closed, reason = %reason, "liquidation finished");
            closed
        }
        .boxed()
    }

    /// Wait for exit monitors and in-flight liquidations after shutdown was signalled
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
