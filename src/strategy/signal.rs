use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SignalConfig;
use crate::domain::{ScenarioForecast, Signal};
use crate::error::{Result, WardenError};

/// Entry signal collaborator. May be slow or wrong; callers bound it with a timeout.
#[async_trait]
pub trait SignalScorer: Send + Sync {
    async fn score(&self, instrument: &str, window: &[Decimal]) -> Result<Signal>;
}

/// Optional scenario forecast produced at entry time
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(
        &self,
        instrument: &str,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Result<Option<ScenarioForecast>>;
}

/// Window momentum scorer.
///
/// BUY when the move across the window is at least `threshold` and the last
/// price sits above the window mean. Confidence is 0.5 at the threshold and
/// grows by 0.25 per extra threshold of momentum, capped at 1.
#[derive(Debug, Clone)]
pub struct MomentumScorer {
    threshold: Decimal,
    strategy_tag: String,
}

impl MomentumScorer {
    pub fn new(threshold: Decimal, strategy_tag: impl Into<String>) -> Self {
        Self {
            threshold,
            strategy_tag: strategy_tag.into(),
        }
    }

    pub fn from_config(cfg: &SignalConfig) -> Self {
        Self::new(cfg.momentum_threshold, cfg.strategy_tag.clone())
    }

    fn evaluate(&self, window: &[Decimal]) -> Signal {
        let (first, last) = match (window.first(), window.last()) {
            (Some(f), Some(l)) if window.len() >= 2 && !f.is_zero() => (*f, *l),
            _ => return Signal::wait(&self.strategy_tag),
        };
        let momentum = (last - first) / first;
        let mean = window.iter().copied().sum::<Decimal>() / Decimal::from(window.len());

        if momentum < self.threshold || last <= mean || self.threshold <= Decimal::ZERO {
            return Signal::wait(&self.strategy_tag);
        }

        let strength = (momentum / self.threshold).to_f64().unwrap_or(1.0);
        let confidence = (0.5 + 0.25 * (strength - 1.0)).min(1.0);
        Signal::buy(confidence, &self.strategy_tag)
    }
}

#[async_trait]
impl SignalScorer for MomentumScorer {
    async fn score(&self, _instrument: &str, window: &[Decimal]) -> Result<Signal> {
        Ok(self.evaluate(window))
    }
}

/// Forecast provider that never has a forecast; exits use fallback thresholds
#[derive(Debug, Clone, Copy, Default)]
pub struct NoForecast;

#[async_trait]
impl ForecastProvider for NoForecast {
    async fn forecast(
        &self,
        _instrument: &str,
        _entry_price: Decimal,
        _entry_time: DateTime<Utc>,
    ) -> Result<Option<ScenarioForecast>> {
        Ok(None)
    }
}

/// Score with a bounded wait; any failure degrades to WAIT
pub async fn score_or_wait(
    scorer: &dyn SignalScorer,
    instrument: &str,
    window: &[Decimal],
    limit: Duration,
    strategy_tag: &str,
) -> Signal {
    match tokio::time::timeout(limit, scorer.score(instrument, window)).await {
        Ok(Ok(signal)) => signal,
        Ok(Err(e)) => {
            warn!(instrument, error = %e, "signal scorer failed, treating as WAIT");
            Signal::wait(strategy_tag)
        }
        Err(_) => {
            warn!(
                instrument,
                timeout_ms = limit.as_millis() as u64,
                "signal scorer timed out, treating as WAIT"
            );
            Signal::wait(strategy_tag)
        }
    }
}

/// Fetch a forecast with a bounded wait; any failure means no forecast
pub async fn forecast_or_none(
    provider: &dyn ForecastProvider,
    instrument: &str,
    entry_price: Decimal,
    entry_time: DateTime<Utc>,
    limit: Duration,
) -> Option<ScenarioForecast> {
    let call = provider.forecast(instrument, entry_price, entry_time);
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(forecast)) => {
            debug!(instrument, has_forecast = forecast.is_some(), "forecast fetched");
            forecast
        }
        Ok(Err(e)) => {
            warn!(instrument, error = %e, "forecast unavailable, using fallback exits");
            None
        }
        Err(_) => {
            let err = WardenError::Collaborator(format!(
                "forecast timed out after {}ms",
                limit.as_millis()
            ));
            warn!(instrument, error = %err, "forecast unavailable, using fallback exits");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SignalDecision;
    use rust_decimal_macros::dec;

    struct Stuck;

    #[async_trait]
    impl SignalScorer for Stuck {
        async fn score(&self, _instrument: &str, _window: &[Decimal]) -> Result<Signal> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Signal::buy(1.0, "stuck"))
        }
    }

    struct Broken;

    #[async_trait]
    impl ForecastProvider for Broken {
        async fn forecast(
            &self,
            _instrument: &str,
            _entry_price: Decimal,
            _entry_time: DateTime<Utc>,
        ) -> Result<Option<ScenarioForecast>> {
            Err(WardenError::Collaborator("model offline".into()))
        }
    }

    #[test]
    fn rising_window_above_mean_is_a_buy() {
        let scorer = MomentumScorer::new(dec!(0.01), "momentum");
        // +2% is twice the threshold
        let signal = scorer.evaluate(&[dec!(100), dec!(100.5), dec!(101), dec!(102)]);
        assert_eq!(signal.decision, SignalDecision::Buy);
        assert!((signal.confidence - 0.75).abs() < 1e-9);
        assert_eq!(signal.strategy_tag, "momentum");
    }

    #[test]
    fn flat_or_short_window_waits() {
        let scorer = MomentumScorer::new(dec!(0.01), "momentum");
        assert!(!scorer.evaluate(&[dec!(100), dec!(100.2)]).is_buy());
        assert!(!scorer.evaluate(&[dec!(100)]).is_buy());
        assert!(!scorer.evaluate(&[]).is_buy());
        // spike then fade: net momentum positive but last below mean
        assert!(!scorer
            .evaluate(&[dec!(100), dec!(110), dec!(110), dec!(102)])
            .is_buy());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_scorer_degrades_to_wait() {
        let signal = score_or_wait(
            &Stuck,
            "BTCUSDT",
            &[dec!(1), dec!(2)],
            Duration::from_millis(100),
            "momentum",
        )
        .await;
        assert_eq!(signal.decision, SignalDecision::Wait);
        assert_eq!(signal.strategy_tag, "momentum");
    }

    #[tokio::test]
    async fn failing_forecast_means_no_forecast() {
        let forecast = forecast_or_none(
            &Broken,
            "BTCUSDT",
            dec!(100),
            Utc::now(),
            Duration::from_millis(100),
        )
        .await;
        assert!(forecast.is_none());
    }
}
