//! Bounded retry with exponential backoff for exchange calls.
//!
//! Transient failures (network, timeout, rate limit) back off and retry.
//! Clock-skew failures run a resync hook and retry immediately. Anything
//! else fails on the first attempt. Every loop is capped and surfaces the
//! last error once attempts run out.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::ExchangeResult;
use crate::config::RetryConfig;
use crate::error::ExchangeError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: true,
        }
    }

    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1), capped, +/-25%
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let millis = capped.as_millis() as f64;
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25) * millis;
        Duration::from_millis((millis + jitter).max(0.0) as u64)
    }

    /// Run `op` under this policy; `resync` is awaited after a clock-skew error.
    pub async fn run<T, Op, Fut, Resync, ResyncFut>(
        &self,
        label: &str,
        mut op: Op,
        mut resync: Resync,
    ) -> ExchangeResult<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
        Resync: FnMut() -> ResyncFut,
        ResyncFut: Future<Output = ExchangeResult<()>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(call = label, attempts = attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                warn!(call = label, attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }

            if err.is_clock_skew() {
                warn!(call = label, error = %err, "clock skew, resyncing before retry");
                if let Err(sync_err) = resync().await {
                    warn!(call = label, error = %sync_err, "clock resync failed");
                }
                continue;
            }

            if !err.is_transient() {
                debug!(call = label, error = %err, "non-retryable error");
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                call = label,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient exchange error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Resync hook for calls that have nothing to resync
pub async fn no_resync() -> ExchangeResult<()> {
    Ok(())
}

/// Bound a single call with a timeout
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> ExchangeResult<T>
where
    Fut: Future<Output = ExchangeResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::Timeout {
            elapsed_ms: limit.as_millis() as u64,
        }),
    }
}
