//! Trading core
//!
//! - `risk` / `sizing` / `exit`: pure decision components
//! - `positions`: the open-position store
//! - `governor`: daily profit governor
//! - `executor`: position lifecycle state machine
//! - `signal`: entry signal and forecast collaborators

pub mod executor;
pub mod exit;
pub mod governor;
pub mod positions;
pub mod risk;
pub mod signal;
pub mod sizing;

pub use executor::{EntryOutcome, Executor, ExecutorDeps, ExitOutcome, SalePlan};
pub use exit::{ExitAction, ExitDecision, ExitPolicy};
pub use governor::{DailyGoalGovernor, DailyGoalState, GoalDecision, GovernorAction, GovernorBand};
pub use positions::{ExposureState, PositionStore};
pub use risk::{CooldownRegistry, RiskGate, RiskReason, RiskVerdict};
pub use signal::{
    forecast_or_none, score_or_wait, ForecastProvider, MomentumScorer, NoForecast, SignalScorer,
};
pub use sizing::PositionSizer;
