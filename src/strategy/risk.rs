use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::positions::PositionStore;
use crate::config::RiskConfig;

/// Why an entry was approved or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskReason {
    Approved,
    DuplicatePosition,
    CooldownActive,
    LimitTrades,
    LowConfidence,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskReason::Approved => "APPROVED",
            RiskReason::DuplicatePosition => "DUPLICATE_POSITION",
            RiskReason::CooldownActive => "COOLDOWN_ACTIVE",
            RiskReason::LimitTrades => "LIMIT_TRADES",
            RiskReason::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

impl std::fmt::Display for RiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskVerdict {
    pub approved: bool,
    pub reason: RiskReason,
}

impl RiskVerdict {
    fn reject(reason: RiskReason) -> Self {
        Self {
            approved: false,
            reason,
        }
    }
}

/// Instrument -> last approved entry attempt. Entries are overwritten, never removed.
#[derive(Debug, Default)]
pub struct CooldownRegistry {
    last_action: DashMap<String, DateTime<Utc>>,
}

impl CooldownRegistry {
    pub fn last_action(&self, instrument: &str) -> Option<DateTime<Utc>> {
        self.last_action.get(instrument).map(|t| *t)
    }
}

/// Pre-trade gate for new entries. Safe to call from every stream task at once.
pub struct RiskGate {
    positions: Arc<PositionStore>,
    cooldowns: CooldownRegistry,
    cooldown: Duration,
    max_open_positions: usize,
    exposure_floor: Decimal,
    min_confidence: f64,
}

impl RiskGate {
    pub fn new(config: &RiskConfig, positions: Arc<PositionStore>) -> Self {
        Self {
            positions,
            cooldowns: CooldownRegistry::default(),
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            max_open_positions: config.max_open_positions,
            exposure_floor: config.exposure_floor_usd,
            min_confidence: config.min_confidence,
        }
    }

    pub fn approve(&self, instrument: &str, confidence: f64) -> RiskVerdict {
        self.approve_at(instrument, confidence, Utc::now())
    }

    pub fn approve_at(&self, instrument: &str, confidence: f64, now: DateTime<Utc>) -> RiskVerdict {
        self.approve_with_pending(instrument, confidence, 0, now)
    }

    /// Checks run in order: duplicate, cooldown, concurrency ceiling, confidence.
    /// `pending` counts entries already reserved but not yet in the store; they
    /// take a slot under the ceiling. The cooldown slot stays locked for the
    /// whole check so two concurrent callers for one instrument cannot both be
    /// approved.
    pub fn approve_with_pending(
        &self,
        instrument: &str,
        confidence: f64,
        pending: usize,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        if self.positions.contains(instrument) {
            debug!(instrument, reason = "DUPLICATE_POSITION", "entry rejected");
            return RiskVerdict::reject(RiskReason::DuplicatePosition);
        }

        let slot = self.cooldowns.last_action.entry(instrument.to_string());
        if let Entry::Occupied(ref last) = slot {
            if now - *last.get() < self.cooldown {
                debug!(instrument, reason = "COOLDOWN_ACTIVE", "entry rejected");
                return RiskVerdict::reject(RiskReason::CooldownActive);
            }
        }

        let exposure = self.positions.exposure(self.exposure_floor);
        if exposure.open_count + pending >= self.max_open_positions {
            debug!(
                instrument,
                open = exposure.open_count,
                pending,
                max = self.max_open_positions,
                reason = "LIMIT_TRADES",
                "entry rejected"
            );
            return RiskVerdict::reject(RiskReason::LimitTrades);
        }

        if confidence < self.min_confidence {
            debug!(instrument, confidence, reason = "LOW_CONFIDENCE", "entry rejected");
            return RiskVerdict::reject(RiskReason::LowConfidence);
        }

        match slot {
            Entry::Occupied(mut last) => {
                last.insert(now);
            }
            Entry::Vacant(empty) => {
                empty.insert(now);
            }
        }
        RiskVerdict {
            approved: true,
            reason: RiskReason::Approved,
        }
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn exposure_floor(&self) -> Decimal {
        self.exposure_floor
    }
}
