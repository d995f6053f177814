use rust_decimal::prelude::*;
use rust_decimal::MathematicalOps;

use crate::config::SizingConfig;
use crate::domain::floor_to_step;

/// Volatility-scaled position sizing and bracket computation.
///
/// Size is inversely proportional to recent volatility and stop distance is
/// proportional to it, so dollar risk per trade stays near
/// `balance * risk_fraction`.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    pub risk_fraction: Decimal,
    pub window: usize,
    pub stop_multiplier: Decimal,
}

impl PositionSizer {
    pub fn from_config(cfg: &SizingConfig) -> Self {
        Self {
            risk_fraction: cfg.risk_fraction,
            window: cfg.window,
            stop_multiplier: cfg.stop_multiplier,
        }
    }

    /// Population standard deviation of the last `window` prices
    pub fn volatility(prices: &[Decimal], window: usize) -> Decimal {
        let start = prices.len().saturating_sub(window.max(1));
        let sample = &prices[start..];
        if sample.len() < 2 {
            return Decimal::ZERO;
        }
        let n = Decimal::from(sample.len());
        let mean = sample.iter().copied().sum::<Decimal>() / n;
        let variance = sample
            .iter()
            .map(|p| (*p - mean) * (*p - mean))
            .sum::<Decimal>()
            / n;
        variance
            .sqrt()
            .map(|sd| sd.round_dp(12).normalize())
            .unwrap_or(Decimal::ZERO)
    }

    /// `floor(balance * risk_fraction / volatility)` in whole units; 0 when volatility is 0
    pub fn size(
        recent: &[Decimal],
        balance: Decimal,
        risk_fraction: Decimal,
        window: usize,
    ) -> Decimal {
        Self::size_in_steps(recent, balance, risk_fraction, window, Decimal::ONE)
    }

    /// Like [`Self::size`] but floored to `step` instead of whole units
    pub fn size_in_steps(
        recent: &[Decimal],
        balance: Decimal,
        risk_fraction: Decimal,
        window: usize,
        step: Decimal,
    ) -> Decimal {
        let vol = Self::volatility(recent, window);
        if vol.is_zero() || balance <= Decimal::ZERO || risk_fraction <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        floor_to_step(balance * risk_fraction / vol, step).max(Decimal::ZERO)
    }

    /// `(entry - mult * vol, entry + mult * vol)` with vol taken from `recent`
    pub fn stops(
        entry: Decimal,
        recent: &[Decimal],
        stop_multiplier: Decimal,
        window: usize,
    ) -> (Decimal, Decimal) {
        Self::stops_from_volatility(entry, Self::volatility(recent, window), stop_multiplier)
    }

    pub fn stops_from_volatility(
        entry: Decimal,
        volatility: Decimal,
        stop_multiplier: Decimal,
    ) -> (Decimal, Decimal) {
        let distance = stop_multiplier * volatility;
        (entry - distance, entry + distance)
    }

    /// Size with this sizer's parameters
    pub fn quantity_for(&self, recent: &[Decimal], balance: Decimal, step: Decimal) -> Decimal {
        Self::size_in_steps(recent, balance, self.risk_fraction, self.window, step)
    }

    /// Brackets with this sizer's parameters
    pub fn brackets_for(&self, entry: Decimal, recent: &[Decimal]) -> (Decimal, Decimal) {
        Self::stops(entry, recent, self.stop_multiplier, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stops_straddle_entry_by_multiple_of_volatility() {
        // population std dev of [98.5, 101.5] is 1.5
        let prices = [dec!(98.5), dec!(101.5)];
        assert_eq!(PositionSizer::volatility(&prices, 20), dec!(1.5));
        let (stop, target) = PositionSizer::stops(dec!(100), &prices, dec!(2), 20);
        assert_eq!(stop, dec!(97));
        assert_eq!(target, dec!(103));
    }

    #[test]
    fn flat_market_sizes_to_zero() {
        let flat = [dec!(50); 20];
        assert_eq!(
            PositionSizer::size(&flat, dec!(1000000), dec!(0.5), 20),
            Decimal::ZERO
        );
        assert_eq!(PositionSizer::size(&[], dec!(1000), dec!(0.01), 20), Decimal::ZERO);
    }

    #[test]
    fn size_is_inverse_to_volatility_and_floored() {
        let calm = [dec!(98.5), dec!(101.5)];
        let wild = [dec!(97), dec!(103)];
        // 1000 * 0.01 / 1.5 = 6.67 -> 6
        assert_eq!(PositionSizer::size(&calm, dec!(1000), dec!(0.01), 20), dec!(6));
        // 1000 * 0.01 / 3 = 3.33 -> 3
        assert_eq!(PositionSizer::size(&wild, dec!(1000), dec!(0.01), 20), dec!(3));
        assert_eq!(
            PositionSizer::size_in_steps(&calm, dec!(1000), dec!(0.01), 20, dec!(0.01)),
            dec!(6.66)
        );
    }

    #[test]
    fn window_limits_the_sample() {
        let prices = [dec!(10), dec!(200), dec!(98.5), dec!(101.5)];
        assert_eq!(PositionSizer::volatility(&prices, 2), dec!(1.5));
    }
}
