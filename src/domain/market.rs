use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Volatility class of an instrument; selects exit limits from the category table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityClass {
    /// Large caps (BTC, ETH)
    Major,
    /// Mid caps
    Mid,
    /// Small caps and meme coins
    High,
}

impl VolatilityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityClass::Major => "major",
            VolatilityClass::Mid => "mid",
            VolatilityClass::High => "high",
        }
    }
}

impl std::fmt::Display for VolatilityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single price observation from the market data feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(instrument: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            timestamp,
        }
    }
}

/// Bounded window of recent prices (oldest first)
#[derive(Debug, Clone)]
pub struct PriceWindow {
    capacity: usize,
    prices: VecDeque<Decimal>,
    last_update: Option<DateTime<Utc>>,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            prices: VecDeque::with_capacity(capacity),
            last_update: None,
        }
    }

    /// Push a new price, evicting the oldest once full
    pub fn push(&mut self, price: Decimal, timestamp: DateTime<Utc>) {
        self.prices.push_back(price);
        while self.prices.len() > self.capacity {
            self.prices.pop_front();
        }
        self.last_update = Some(timestamp);
    }

    pub fn latest(&self) -> Option<Decimal> {
        self.prices.back().copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.prices.len() >= self.capacity
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Copy of the window contents, oldest first
    pub fn to_vec(&self) -> Vec<Decimal> {
        self.prices.iter().copied().collect()
    }
}

/// Exchange trading filters for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Lot size step for quantities
    pub qty_step: Decimal,
    /// Tick size for prices
    pub price_step: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Floor a quantity to the lot-size step
    pub fn floor_qty(&self, qty: Decimal) -> Decimal {
        floor_to_step(qty, self.qty_step)
    }

    /// Floor a price to the tick size
    pub fn floor_price(&self, price: Decimal) -> Decimal {
        floor_to_step(price, self.price_step)
    }
}

/// Floor `value` to a multiple of `step`; a non-positive step leaves the value untouched
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let floored = (value / step).floor() * step;
    floored.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floors_to_lot_step() {
        assert_eq!(floor_to_step(dec!(1.23456), dec!(0.001)), dec!(1.234));
        assert_eq!(floor_to_step(dec!(0.0009), dec!(0.001)), dec!(0));
        assert_eq!(floor_to_step(dec!(7), dec!(1)), dec!(7));
        assert_eq!(floor_to_step(dec!(3.5), dec!(0)), dec!(3.5));
    }

    #[test]
    fn price_window_is_bounded() {
        let now = Utc::now();
        let mut window = PriceWindow::new(3);
        for p in [dec!(1), dec!(2), dec!(3), dec!(4)] {
            window.push(p, now);
        }
        assert!(window.is_full());
        assert_eq!(window.to_vec(), vec![dec!(2), dec!(3), dec!(4)]);
        assert_eq!(window.latest(), Some(dec!(4)));
    }
}
