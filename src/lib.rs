pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;
pub mod supervisor;

pub use config::AppConfig;
pub use error::{ExchangeError, Result, WardenError};
pub use strategy::{
    DailyGoalGovernor, EntryOutcome, Executor, ExitDecision, ExitOutcome, ExitPolicy,
    PositionSizer, PositionStore, RiskGate,
};
pub use supervisor::{Collaborators, HealthRegistry, Supervisor};
