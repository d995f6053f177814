use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountSnapshot, ScenarioForecast, TierKind, VolatilityClass};

/// Cumulative-sell tiers that fire at most once per position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleTier {
    Forecast(TierKind),
    FallbackProfit,
}

impl std::fmt::Display for SaleTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaleTier::Forecast(kind) => write!(f, "forecast_{}", kind),
            SaleTier::FallbackProfit => write!(f, "fallback_profit"),
        }
    }
}

/// Reason codes attached to every exit evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TrailingStop,
    ForecastTier(TierKind),
    /// Realistic tier reached but the optimistic ETA is still young
    ForecastPatience,
    TimeLimit,
    /// Time limit passed while in loss; holding instead of forcing the loss
    StaleInLoss,
    HardStop,
    StopLossPrice,
    FallbackTakeProfit,
    /// Daily goal stretch target forced liquidation
    GoalLiquidation,
    /// Remaining quantity too small to keep after a partial sale
    DustRemainder,
    Manual,
    NoTrigger,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::ForecastTier(kind) => write!(f, "FORECAST_{}", kind.as_str().to_uppercase()),
            ExitReason::ForecastPatience => write!(f, "FORECAST_PATIENCE"),
            ExitReason::TimeLimit => write!(f, "TIME_LIMIT"),
            ExitReason::StaleInLoss => write!(f, "STALE_IN_LOSS"),
            ExitReason::HardStop => write!(f, "HARD_STOP"),
            ExitReason::StopLossPrice => write!(f, "STOP_LOSS_PRICE"),
            ExitReason::FallbackTakeProfit => write!(f, "FALLBACK_TAKE_PROFIT"),
            ExitReason::GoalLiquidation => write!(f, "GOAL_LIQUIDATION"),
            ExitReason::DustRemainder => write!(f, "DUST_REMAINDER"),
            ExitReason::Manual => write!(f, "MANUAL"),
            ExitReason::NoTrigger => write!(f, "NO_TRIGGER"),
        }
    }
}

/// An open position in one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: String,
    pub base_asset: String,
    pub category: VolatilityClass,
    pub quantity: Decimal,
    /// Average execution price
    pub entry_price: Decimal,
    /// Entry price including fees; P&L is measured against this
    pub entry_price_with_fee: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub strategy_tag: String,
    /// Tiers already sold, in firing order
    #[serde(default)]
    pub partial_sales: Vec<SaleTier>,
    #[serde(default)]
    pub trailing_high_water_mark: Option<Decimal>,
    #[serde(default)]
    pub forecast: Option<ScenarioForecast>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: impl Into<String>,
        base_asset: impl Into<String>,
        category: VolatilityClass,
        quantity: Decimal,
        entry_price: Decimal,
        entry_price_with_fee: Decimal,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
        strategy_tag: impl Into<String>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instrument: instrument.into(),
            base_asset: base_asset.into(),
            category,
            quantity,
            entry_price,
            entry_price_with_fee,
            take_profit_price,
            stop_loss_price,
            opened_at,
            strategy_tag: strategy_tag.into(),
            partial_sales: Vec::new(),
            trailing_high_water_mark: None,
            forecast: None,
        }
    }

    pub fn with_forecast(mut self, forecast: Option<ScenarioForecast>) -> Self {
        self.forecast = forecast;
        self
    }

    /// Notional at entry
    pub fn notional(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    /// Return relative to the fee-adjusted entry
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price_with_fee.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price_with_fee) / self.entry_price_with_fee
    }

    /// Raise the high-water mark; never lowers it
    pub fn update_high_water(&mut self, price: Decimal) {
        match self.trailing_high_water_mark {
            Some(high) if high >= price => {}
            _ => self.trailing_high_water_mark = Some(price),
        }
    }

    pub fn has_sold(&self, tier: SaleTier) -> bool {
        self.partial_sales.contains(&tier)
    }

    pub fn record_sale(&mut self, tier: SaleTier) {
        if !self.has_sold(tier) {
            self.partial_sales.push(tier);
        }
    }

    /// Holding time in hours (fractional)
    pub fn elapsed_hours(&self, now: DateTime<Utc>) -> Decimal {
        let secs = (now - self.opened_at).num_seconds().max(0);
        Decimal::from(secs) / Decimal::from(3600)
    }
}

/// Immutable ledger entry for one full or partial close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTradeRecord {
    pub id: String,
    pub position_id: String,
    pub instrument: String,
    pub strategy_tag: String,
    pub quantity: Decimal,
    pub entry_price_with_fee: Decimal,
    pub exit_price_with_fee: Decimal,
    pub realized_pnl: Decimal,
    pub reason: ExitReason,
    pub full_close: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub account_before: Option<AccountSnapshot>,
    pub account_after: Option<AccountSnapshot>,
}

impl ClosedTradeRecord {
    pub fn pnl_pct(&self) -> Decimal {
        let cost = self.entry_price_with_fee * self.quantity;
        if cost.is_zero() {
            return Decimal::ZERO;
        }
        self.realized_pnl / cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new(
            "BTCUSDT",
            "BTC",
            VolatilityClass::Major,
            dec!(10),
            dec!(100),
            dec!(100.1),
            dec!(97),
            dec!(103),
            "momentum",
            Utc::now(),
        )
    }

    #[test]
    fn pnl_is_measured_against_fee_adjusted_entry() {
        let pos = position();
        assert!(pos.pnl_pct(dec!(100.1)).is_zero());
        assert!(pos.pnl_pct(dec!(100)) < Decimal::ZERO);
    }

    #[test]
    fn high_water_mark_only_rises() {
        let mut pos = position();
        pos.update_high_water(dec!(105));
        pos.update_high_water(dec!(101));
        assert_eq!(pos.trailing_high_water_mark, Some(dec!(105)));
    }

    #[test]
    fn sale_tiers_are_recorded_once_in_order() {
        let mut pos = position();
        pos.record_sale(SaleTier::Forecast(TierKind::Conservative));
        pos.record_sale(SaleTier::FallbackProfit);
        pos.record_sale(SaleTier::Forecast(TierKind::Conservative));
        assert_eq!(
            pos.partial_sales,
            vec![
                SaleTier::Forecast(TierKind::Conservative),
                SaleTier::FallbackProfit
            ]
        );
    }
}
