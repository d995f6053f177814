use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Entry decision from the signal collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDecision {
    Buy,
    Wait,
}

/// Scored entry signal for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub decision: SignalDecision,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub strategy_tag: String,
}

impl Signal {
    pub fn wait(strategy_tag: impl Into<String>) -> Self {
        Self {
            decision: SignalDecision::Wait,
            confidence: 0.0,
            strategy_tag: strategy_tag.into(),
        }
    }

    pub fn buy(confidence: f64, strategy_tag: impl Into<String>) -> Self {
        Self {
            decision: SignalDecision::Buy,
            confidence: confidence.clamp(0.0, 1.0),
            strategy_tag: strategy_tag.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.decision == SignalDecision::Buy
    }
}

/// Forecast tiers, from least to most ambitious
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Conservative,
    Realistic,
    Optimistic,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Conservative => "conservative",
            TierKind::Realistic => "realistic",
            TierKind::Optimistic => "optimistic",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One forecast scenario: target return, time to reach it, and its probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastTier {
    /// Target return as a fraction (0.02 = +2%)
    pub target_pct: Decimal,
    pub eta_hours: Decimal,
    /// 0.0 - 1.0
    pub probability: f64,
}

/// Three-tier scenario forecast produced at entry time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioForecast {
    pub conservative: ForecastTier,
    pub realistic: ForecastTier,
    pub optimistic: ForecastTier,
    pub generated_at: DateTime<Utc>,
}

impl ScenarioForecast {
    pub fn tier(&self, kind: TierKind) -> &ForecastTier {
        match kind {
            TierKind::Conservative => &self.conservative,
            TierKind::Realistic => &self.realistic,
            TierKind::Optimistic => &self.optimistic,
        }
    }
}
