//! Exit rules for open positions.
//!
//! Evaluated in order, first match wins:
//! 1. trailing stop, once armed
//! 2. forecast tiers (optimistic, realistic with patience, conservative)
//! 3. category time limit (never forces a realized loss)
//! 4. hard stop and fallback take-profit

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::ExitConfig;
use crate::domain::{ExitReason, Position, SaleTier, TierKind, Urgency};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Hold,
    /// Fraction (0, 1) of the current quantity
    PartialSell(Decimal),
    SellAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDecision {
    pub action: ExitAction,
    pub reason: ExitReason,
    pub urgency: Urgency,
    /// Tier to mark as fired once the sale fills
    pub tier: Option<SaleTier>,
}

impl ExitDecision {
    pub fn hold(reason: ExitReason, urgency: Urgency) -> Self {
        Self {
            action: ExitAction::Hold,
            reason,
            urgency,
            tier: None,
        }
    }

    pub fn sell_all(reason: ExitReason, urgency: Urgency) -> Self {
        Self {
            action: ExitAction::SellAll,
            reason,
            urgency,
            tier: None,
        }
    }

    /// Fractions of 1 or more collapse to a full sale
    fn sell_fraction(fraction: Decimal, reason: ExitReason, tier: SaleTier) -> Self {
        let action = if fraction >= Decimal::ONE {
            ExitAction::SellAll
        } else {
            ExitAction::PartialSell(fraction)
        };
        Self {
            action,
            reason,
            urgency: Urgency::Normal,
            tier: Some(tier),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == ExitAction::Hold
    }
}

#[derive(Debug, Clone)]
pub struct ExitPolicy {
    config: ExitConfig,
}

impl ExitPolicy {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Decide what to do with `pos` at `price`. Pure: the caller owns the
    /// high-water mark update and the tier bookkeeping.
    pub fn evaluate(&self, pos: &Position, price: Decimal, now: DateTime<Utc>) -> ExitDecision {
        let pnl_pct = pos.pnl_pct(price);
        let elapsed_hours = pos.elapsed_hours(now);

        if let Some(d) = self.check_trailing(pos, price) {
            return d;
        }
        if let Some(d) = self.check_forecast(pos, pnl_pct, elapsed_hours) {
            return d;
        }
        if let Some(d) = self.check_time_limit(pos, price, pnl_pct, elapsed_hours) {
            return d;
        }
        if let Some(d) = self.check_hard_stop(pos, price, pnl_pct) {
            return d;
        }
        if let Some(d) = self.check_fallback_profit(pos, price, pnl_pct) {
            return d;
        }
        ExitDecision::hold(ExitReason::NoTrigger, Urgency::Normal)
    }

    /// Armed once the high-water mark clears entry by the activation margin
    fn check_trailing(&self, pos: &Position, price: Decimal) -> Option<ExitDecision> {
        let high = pos.trailing_high_water_mark.unwrap_or(price).max(price);
        let activation = pos.entry_price_with_fee * (Decimal::ONE + self.config.trailing_activation_pct);
        if high < activation {
            return None;
        }
        let trail = self.config.categories.limits(pos.category).trailing_stop_pct;
        if price < high * (Decimal::ONE - trail) {
            tracing::info!(
                instrument = %pos.instrument,
                high = %high,
                price = %price,
                trail_pct = %trail,
                "Trailing stop triggered"
            );
            return Some(ExitDecision::sell_all(ExitReason::TrailingStop, Urgency::Elevated));
        }
        None
    }

    fn check_forecast(
        &self,
        pos: &Position,
        pnl_pct: Decimal,
        elapsed_hours: Decimal,
    ) -> Option<ExitDecision> {
        let forecast = pos.forecast.as_ref()?;
        let reached = |kind: TierKind| pnl_pct >= forecast.tier(kind).target_pct;
        let fresh = |kind: TierKind| !pos.has_sold(SaleTier::Forecast(kind));

        if reached(TierKind::Optimistic) && fresh(TierKind::Optimistic) {
            return Some(ExitDecision::sell_fraction(
                self.config.optimistic_fraction,
                ExitReason::ForecastTier(TierKind::Optimistic),
                SaleTier::Forecast(TierKind::Optimistic),
            ));
        }

        if reached(TierKind::Realistic) && fresh(TierKind::Realistic) {
            let optimistic = forecast.tier(TierKind::Optimistic);
            let patience_window = optimistic.eta_hours * self.config.patience_eta_fraction;
            let patient = elapsed_hours < patience_window
                && optimistic.probability >= self.config.patience_min_probability;
            let (fraction, reason) = if patient {
                (
                    self.config.realistic_patient_fraction,
                    ExitReason::ForecastPatience,
                )
            } else {
                (
                    self.config.realistic_fraction,
                    ExitReason::ForecastTier(TierKind::Realistic),
                )
            };
            return Some(ExitDecision::sell_fraction(
                fraction,
                reason,
                SaleTier::Forecast(TierKind::Realistic),
            ));
        }

        if reached(TierKind::Conservative)
            && fresh(TierKind::Conservative)
            // a higher tier already fired; the conservative slice is gone
            && fresh(TierKind::Realistic)
        {
            return Some(ExitDecision::sell_fraction(
                self.config.conservative_fraction,
                ExitReason::ForecastTier(TierKind::Conservative),
                SaleTier::Forecast(TierKind::Conservative),
            ));
        }

        None
    }

    fn check_time_limit(
        &self,
        pos: &Position,
        price: Decimal,
        pnl_pct: Decimal,
        elapsed_hours: Decimal,
    ) -> Option<ExitDecision> {
        let limit = self.config.categories.limits(pos.category).time_limit_hours;
        if elapsed_hours <= limit {
            return None;
        }
        if pnl_pct >= Decimal::ZERO {
            tracing::info!(
                instrument = %pos.instrument,
                elapsed_hours = %elapsed_hours.round_dp(2),
                pnl_pct = %pnl_pct,
                "Time limit reached"
            );
            return Some(ExitDecision::sell_all(ExitReason::TimeLimit, Urgency::Elevated));
        }
        // Stale and losing: the hard stop still bounds the loss, time alone never realizes it
        if let Some(stop) = self.check_hard_stop(pos, price, pnl_pct) {
            return Some(stop);
        }
        Some(ExitDecision::hold(ExitReason::StaleInLoss, Urgency::Critical))
    }

    fn check_hard_stop(&self, pos: &Position, price: Decimal, pnl_pct: Decimal) -> Option<ExitDecision> {
        if pnl_pct <= -self.config.hard_stop_pct {
            tracing::warn!(
                instrument = %pos.instrument,
                pnl_pct = %pnl_pct,
                threshold = %self.config.hard_stop_pct,
                "Hard stop triggered"
            );
            return Some(ExitDecision::sell_all(ExitReason::HardStop, Urgency::Critical));
        }
        if price <= pos.stop_loss_price {
            tracing::warn!(
                instrument = %pos.instrument,
                price = %price,
                stop = %pos.stop_loss_price,
                "Stop-loss price hit"
            );
            return Some(ExitDecision::sell_all(ExitReason::StopLossPrice, Urgency::Critical));
        }
        None
    }

    /// Without a forecast: sell a slice once profit clears the fallback threshold
    fn check_fallback_profit(
        &self,
        pos: &Position,
        price: Decimal,
        pnl_pct: Decimal,
    ) -> Option<ExitDecision> {
        if pos.forecast.is_some() || pos.has_sold(SaleTier::FallbackProfit) {
            return None;
        }
        if pnl_pct >= self.config.fallback_take_profit_pct || price >= pos.take_profit_price {
            tracing::info!(
                instrument = %pos.instrument,
                pnl_pct = %pnl_pct,
                "Fallback take-profit reached"
            );
            return Some(ExitDecision::sell_fraction(
                self.config.fallback_take_profit_fraction,
                ExitReason::FallbackTakeProfit,
                SaleTier::FallbackProfit,
            ));
        }
        None
    }
}
