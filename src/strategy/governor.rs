use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{DefaultDecision, GovernorConfig};
use crate::domain::ClosedTradeRecord;

/// Daily goal band. `Halted` is terminal until the day rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GovernorBand {
    /// Below the primary target
    Trading,
    /// Primary target reached; new entries wait for a continue/stop decision
    Paused,
    /// Trading resumed after an explicit or default continue
    Continuing,
    Halted,
}

impl GovernorBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernorBand::Trading => "TRADING",
            GovernorBand::Paused => "PAUSED",
            GovernorBand::Continuing => "CONTINUING",
            GovernorBand::Halted => "HALTED",
        }
    }

    pub fn allows_entries(&self) -> bool {
        matches!(self, GovernorBand::Trading | GovernorBand::Continuing)
    }

    /// Legal band moves within one day
    pub fn can_transition_to(&self, target: &GovernorBand) -> bool {
        use GovernorBand::*;
        matches!(
            (self, target),
            (Trading, Paused)
                | (Trading, Halted)
                | (Paused, Continuing)
                | (Paused, Halted)
                | (Continuing, Halted)
        )
    }
}

impl std::fmt::Display for GovernorBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the caller must do after a governor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorAction {
    None,
    PauseEntries,
    /// Stretch target reached: close every open position, then stay halted
    ForceLiquidate,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalDecision {
    Continue,
    Stop,
}

impl From<DefaultDecision> for GoalDecision {
    fn from(d: DefaultDecision) -> Self {
        match d {
            DefaultDecision::Continue => GoalDecision::Continue,
            DefaultDecision::Stop => GoalDecision::Stop,
        }
    }
}

/// One calendar day (UTC) of goal tracking
#[derive(Debug, Clone, PartialEq)]
pub struct DailyGoalState {
    pub day: NaiveDate,
    pub starting_equity: Decimal,
    pub realized_pnl_today: Decimal,
    pub target_primary: Decimal,
    pub target_stretch: Decimal,
    /// Claw-back level that halts trading once the primary target was reached
    pub floor_after_target: Decimal,
    pub band: GovernorBand,
    pub primary_reached: bool,
    pub liquidated: bool,
    pub pause_deadline: Option<DateTime<Utc>>,
}

impl DailyGoalState {
    pub fn new(day: NaiveDate, starting_equity: Decimal, cfg: &GovernorConfig) -> Self {
        let target_primary = starting_equity * cfg.primary_target_pct;
        Self {
            day,
            starting_equity,
            realized_pnl_today: Decimal::ZERO,
            target_primary,
            target_stretch: starting_equity * cfg.stretch_target_pct,
            floor_after_target: target_primary * cfg.floor_ratio,
            band: GovernorBand::Trading,
            primary_reached: false,
            liquidated: false,
            pause_deadline: None,
        }
    }

    fn move_to(&mut self, band: GovernorBand) -> bool {
        if self.band == band {
            return false;
        }
        if !self.band.can_transition_to(&band) {
            warn!(from = %self.band, to = %band, "governor transition refused");
            return false;
        }
        info!(
            from = %self.band,
            to = %band,
            realized = %self.realized_pnl_today,
            "daily goal band changed"
        );
        self.band = band;
        if band != GovernorBand::Paused {
            self.pause_deadline = None;
        }
        true
    }

    /// Apply a realized P&L change
    pub fn apply(&mut self, pnl_delta: Decimal, now: DateTime<Utc>, timeout: Duration) -> GovernorAction {
        self.realized_pnl_today += pnl_delta;
        if self.band == GovernorBand::Halted {
            return GovernorAction::None;
        }

        if self.realized_pnl_today >= self.target_stretch && !self.liquidated {
            self.primary_reached = true;
            self.liquidated = true;
            self.move_to(GovernorBand::Halted);
            return GovernorAction::ForceLiquidate;
        }

        if self.primary_reached && self.realized_pnl_today <= self.floor_after_target {
            self.move_to(GovernorBand::Halted);
            return GovernorAction::Halt;
        }

        if self.realized_pnl_today >= self.target_primary && self.band == GovernorBand::Trading {
            self.primary_reached = true;
            self.move_to(GovernorBand::Paused);
            self.pause_deadline = Some(now + timeout);
            return GovernorAction::PauseEntries;
        }

        GovernorAction::None
    }
}

/// Daily profit governor: one-way ratchet per day
pub struct DailyGoalGovernor {
    config: GovernorConfig,
    state: RwLock<DailyGoalState>,
}

impl DailyGoalGovernor {
    pub fn new(config: GovernorConfig, starting_equity: Decimal, day: NaiveDate) -> Self {
        let state = DailyGoalState::new(day, starting_equity, &config);
        info!(
            %day,
            equity = %starting_equity,
            primary = %state.target_primary,
            stretch = %state.target_stretch,
            "daily goal initialized"
        );
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    fn decision_timeout(&self) -> Duration {
        Duration::seconds(self.config.decision_timeout_secs as i64)
    }

    pub async fn state(&self) -> DailyGoalState {
        self.state.read().await.clone()
    }

    pub async fn band(&self) -> GovernorBand {
        self.state.read().await.band
    }

    pub async fn allows_entries(&self) -> bool {
        self.state.read().await.band.allows_entries()
    }

    /// Record realized P&L from a close
    pub async fn update(&self, pnl_delta: Decimal) -> GovernorAction {
        self.update_at(pnl_delta, Utc::now()).await
    }

    pub async fn update_at(&self, pnl_delta: Decimal, now: DateTime<Utc>) -> GovernorAction {
        let timeout = self.decision_timeout();
        let mut state = self.state.write().await;
        let action = state.apply(pnl_delta, now, timeout);
        if action == GovernorAction::ForceLiquidate {
            warn!(realized = %state.realized_pnl_today, "stretch target reached, liquidating");
        }
        action
    }

    /// Rebuild the day's band from closed trades, applied in `closed_at` order.
    /// Liquidation is not re-triggered; a replayed stretch hit only halts.
    pub async fn replay(&self, records: &[ClosedTradeRecord]) -> GovernorBand {
        let mut ordered: Vec<&ClosedTradeRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.closed_at);

        let timeout = self.decision_timeout();
        let mut state = self.state.write().await;
        for record in ordered {
            state.apply(record.realized_pnl, record.closed_at, timeout);
        }
        info!(
            trades = records.len(),
            realized = %state.realized_pnl_today,
            band = %state.band,
            "daily goal restored from ledger"
        );
        state.band
    }

    /// Explicit continue/stop while paused; returns whether it applied
    pub async fn decide(&self, decision: GoalDecision) -> bool {
        let mut state = self.state.write().await;
        if state.band != GovernorBand::Paused {
            return false;
        }
        let target = match decision {
            GoalDecision::Continue => GovernorBand::Continuing,
            GoalDecision::Stop => GovernorBand::Halted,
        };
        state.move_to(target)
    }

    /// Apply the default decision once the pause deadline passes
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<GovernorBand> {
        let mut state = self.state.write().await;
        match (state.band, state.pause_deadline) {
            (GovernorBand::Paused, Some(deadline)) if now >= deadline => {
                let target = match GoalDecision::from(self.config.default_decision) {
                    GoalDecision::Continue => GovernorBand::Continuing,
                    GoalDecision::Stop => GovernorBand::Halted,
                };
                info!(decision = %target, "pause timed out, applying default decision");
                state.move_to(target).then_some(target)
            }
            _ => None,
        }
    }

    /// Reset for a new UTC day; no-op when `day` is the current one
    pub async fn roll_day(&self, day: NaiveDate, starting_equity: Decimal) -> bool {
        let mut state = self.state.write().await;
        if state.day >= day {
            return false;
        }
        info!(
            previous = %state.day,
            %day,
            realized = %state.realized_pnl_today,
            equity = %starting_equity,
            "daily goal rolled over"
        );
        *state = DailyGoalState::new(day, starting_equity, &self.config);
        true
    }

    pub async fn day(&self) -> NaiveDate {
        self.state.read().await.day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExitReason;
    use rust_decimal_macros::dec;

    fn governor(default_decision: DefaultDecision) -> DailyGoalGovernor {
        let config = GovernorConfig {
            primary_target_pct: dec!(0.01),
            stretch_target_pct: dec!(0.02),
            floor_ratio: dec!(0.8),
            decision_timeout_secs: 60,
            default_decision,
        };
        DailyGoalGovernor::new(
            config,
            dec!(1000),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        )
    }

    #[tokio::test]
    async fn primary_target_pauses_then_clawback_halts() {
        let gov = governor(DefaultDecision::Stop);
        assert_eq!(gov.update(dec!(12)).await, GovernorAction::PauseEntries);
        assert_eq!(gov.band().await, GovernorBand::Paused);
        assert!(!gov.allows_entries().await);

        // 12 - 5 = 7, below the floor of 8
        assert_eq!(gov.update(dec!(-5)).await, GovernorAction::Halt);
        assert_eq!(gov.band().await, GovernorBand::Halted);
    }

    fn closed(pnl: Decimal, at: DateTime<Utc>) -> ClosedTradeRecord {
        ClosedTradeRecord {
            id: at.timestamp_millis().to_string(),
            position_id: "p".into(),
            instrument: "ETHUSDT".into(),
            strategy_tag: "momentum".into(),
            quantity: dec!(1),
            entry_price_with_fee: dec!(100),
            exit_price_with_fee: dec!(100) + pnl,
            realized_pnl: pnl,
            reason: ExitReason::HardStop,
            full_close: true,
            opened_at: at,
            closed_at: at,
            account_before: None,
            account_after: None,
        }
    }

    #[tokio::test]
    async fn replay_follows_close_order_not_net_sum() {
        let gov = governor(DefaultDecision::Continue);
        let t0 = Utc::now() - Duration::minutes(10);
        // stored out of order; +12 closed first, then -5
        let records = [closed(dec!(-5), t0 + Duration::minutes(1)), closed(dec!(12), t0)];
        assert_eq!(gov.replay(&records).await, GovernorBand::Halted);
        assert_eq!(gov.state().await.realized_pnl_today, dec!(7));
        assert!(!gov.allows_entries().await);
    }

    #[tokio::test]
    async fn replayed_stretch_hit_is_not_liquidated_again() {
        let gov = governor(DefaultDecision::Continue);
        gov.replay(&[closed(dec!(25), Utc::now())]).await;
        let state = gov.state().await;
        assert_eq!(state.band, GovernorBand::Halted);
        assert!(state.liquidated);
        assert_eq!(gov.update(dec!(1)).await, GovernorAction::None);
    }

    #[tokio::test]
    async fn halted_never_rearms_within_the_day() {
        let gov = governor(DefaultDecision::Continue);
        gov.update(dec!(12)).await;
        gov.update(dec!(-5)).await;
        for delta in [dec!(50), dec!(-100), dec!(3), dec!(30)] {
            assert_eq!(gov.update(delta).await, GovernorAction::None);
            assert_eq!(gov.band().await, GovernorBand::Halted);
        }
        assert!(!gov.decide(GoalDecision::Continue).await);
        assert!(!gov.allows_entries().await);
    }

    #[tokio::test]
    async fn stretch_target_liquidates_once() {
        let gov = governor(DefaultDecision::Continue);
        gov.update(dec!(11)).await;
        assert!(gov.decide(GoalDecision::Continue).await);
        assert!(gov.allows_entries().await);
        assert_eq!(gov.update(dec!(10)).await, GovernorAction::ForceLiquidate);
        assert_eq!(gov.update(dec!(5)).await, GovernorAction::None);
        assert!(gov.state().await.liquidated);
    }

    #[tokio::test]
    async fn continuing_band_still_halts_on_clawback() {
        let gov = governor(DefaultDecision::Continue);
        gov.update(dec!(11)).await;
        gov.decide(GoalDecision::Continue).await;
        assert_eq!(gov.update(dec!(-3.5)).await, GovernorAction::Halt);
    }

    #[tokio::test]
    async fn pause_times_out_to_default_decision() {
        let gov = governor(DefaultDecision::Stop);
        let now = Utc::now();
        gov.update_at(dec!(10), now).await;
        assert_eq!(gov.tick(now + Duration::seconds(30)).await, None);
        assert_eq!(
            gov.tick(now + Duration::seconds(61)).await,
            Some(GovernorBand::Halted)
        );
    }

    #[tokio::test]
    async fn new_day_resets_the_ratchet() {
        let gov = governor(DefaultDecision::Stop);
        gov.update(dec!(25)).await;
        assert_eq!(gov.band().await, GovernorBand::Halted);

        let next = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert!(gov.roll_day(next, dec!(1025)).await);
        assert!(!gov.roll_day(next, dec!(1025)).await);
        let state = gov.state().await;
        assert_eq!(state.band, GovernorBand::Trading);
        assert_eq!(state.realized_pnl_today, dec!(0));
        assert_eq!(state.target_primary, dec!(10.25));
    }
}
