use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::error;

use crate::domain::Position;
use crate::error::{Result, WardenError};

/// Count and notional of open positions, derived on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureState {
    /// Positions at or above the exposure floor
    pub open_count: usize,
    pub notional: Decimal,
}

/// Open positions keyed by instrument.
///
/// Only the executor mutates it; everything else reads snapshots.
#[derive(Debug, Default)]
pub struct PositionStore {
    positions: DashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new position; refuses a second position for the same instrument
    pub fn insert(&self, position: Position) -> Result<()> {
        if position.quantity <= Decimal::ZERO {
            error!(instrument = %position.instrument, qty = %position.quantity, "refusing non-positive position");
            return Err(WardenError::InvariantViolation(format!(
                "position for {} has non-positive quantity {}",
                position.instrument, position.quantity
            )));
        }
        match self.positions.entry(position.instrument.clone()) {
            Entry::Occupied(_) => {
                error!(instrument = %position.instrument, "duplicate position refused");
                Err(WardenError::InvariantViolation(format!(
                    "duplicate position for {}",
                    position.instrument
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(position);
                Ok(())
            }
        }
    }

    pub fn get(&self, instrument: &str) -> Option<Position> {
        self.positions.get(instrument).map(|p| p.clone())
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    /// Mutate a position in place; `None` if the instrument has no position
    pub fn update<R>(&self, instrument: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        self.positions.get_mut(instrument).map(|mut p| f(&mut p))
    }

    /// Reduce quantity after a partial sale; returns the remaining quantity
    pub fn reduce(&self, instrument: &str, sold: Decimal) -> Result<Decimal> {
        let mut pos = self.positions.get_mut(instrument).ok_or_else(|| {
            WardenError::InvariantViolation(format!("reduce on missing position {}", instrument))
        })?;
        let remaining = pos.quantity - sold;
        if remaining <= Decimal::ZERO {
            return Err(WardenError::InvariantViolation(format!(
                "partial sale of {} would leave {} with {}",
                sold, instrument, remaining
            )));
        }
        pos.quantity = remaining;
        Ok(remaining)
    }

    pub fn remove(&self, instrument: &str) -> Option<Position> {
        self.positions.remove(instrument).map(|(_, p)| p)
    }

    /// All open positions ordered by instrument
    pub fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions with notional at or above `floor` count toward exposure
    pub fn exposure(&self, floor: Decimal) -> ExposureState {
        self.positions
            .iter()
            .map(|p| p.notional())
            .filter(|n| *n >= floor)
            .fold(ExposureState::default(), |acc, n| ExposureState {
                open_count: acc.open_count + 1,
                notional: acc.notional + n,
            })
    }
}
