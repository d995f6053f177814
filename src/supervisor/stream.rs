//! One supervised task per instrument: a reconnecting tick subscription that
//! drives entries and exit checks.

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::health::HealthRegistry;
use crate::adapters::{MarketFeed, Notification, Notifier, TickStream};
use crate::config::AppConfig;
use crate::domain::{Lifecycle, PriceWindow, Tick};
use crate::error::{Result, WardenError};
use crate::strategy::{score_or_wait, EntryOutcome, Executor, ExitOutcome, SignalScorer};

/// Shared handles every stream task needs
#[derive(Clone)]
pub struct StreamContext {
    pub executor: Arc<Executor>,
    pub feed: Arc<dyn MarketFeed>,
    pub scorer: Arc<dyn SignalScorer>,
    pub health: Arc<HealthRegistry>,
    pub notifier: Arc<dyn Notifier>,
}

/// Why a connection ended
#[derive(Debug)]
enum StreamEnd {
    Shutdown,
    Dropped { received: u64, error: String },
}

pub struct StreamSupervisor {
    instrument: String,
    ctx: StreamContext,
    window: PriceWindow,
    reconnect_base: Duration,
    reconnect_max: Duration,
    max_reconnect_attempts: u32,
    idle_timeout: Duration,
    score_timeout: Duration,
    strategy_tag: String,
    /// An entry attempt (scoring + executor) is running off the tick path
    entering: Arc<AtomicBool>,
    /// An exit evaluation is running off the tick path
    evaluating: Arc<AtomicBool>,
    tasks: TaskTracker,
}

impl StreamSupervisor {
    pub fn new(instrument: impl Into<String>, ctx: StreamContext, config: &AppConfig) -> Self {
        let stream = &config.stream;
        Self {
            instrument: instrument.into(),
            ctx,
            window: PriceWindow::new(stream.price_window),
            reconnect_base: Duration::from_secs(stream.reconnect_base_secs),
            reconnect_max: Duration::from_secs(stream.reconnect_max_secs),
            max_reconnect_attempts: stream.max_reconnect_attempts,
            idle_timeout: Duration::from_secs(stream.idle_timeout_secs),
            score_timeout: Duration::from_millis(config.signal.score_timeout_ms),
            strategy_tag: config.signal.strategy_tag.clone(),
            entering: Arc::new(AtomicBool::new(false)),
            evaluating: Arc::new(AtomicBool::new(false)),
            tasks: TaskTracker::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Delay before reconnect `attempt` (1-based): base doubling, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.reconnect_base
            .saturating_mul(1u32 << exp)
            .min(self.reconnect_max)
    }

    /// Run until shutdown (`Ok`) or until the reconnect budget is spent
    /// (`Err(StreamDegraded)`). A session that delivered ticks resets the budget.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let instrument = self.instrument.clone();
        self.ctx.health.register(&instrument).await;
        info!(instrument = %instrument, "stream supervisor started");

        let mut attempts: u32 = 0;
        let outcome = loop {
            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                s = self.ctx.feed.subscribe(&instrument) => s,
            };

            let error = match subscribed {
                Ok(stream) => match self.consume(stream, &shutdown).await {
                    StreamEnd::Shutdown => break Ok(()),
                    StreamEnd::Dropped { received, error } => {
                        if received > 0 {
                            attempts = 0;
                        }
                        error
                    }
                },
                Err(e) => e.to_string(),
            };

            attempts += 1;
            if attempts > self.max_reconnect_attempts {
                let attempts = self.max_reconnect_attempts;
                self.ctx.health.mark_degraded(&instrument, &error).await;
                self.ctx.notifier.notify(Notification::StreamDegraded {
                    instrument: instrument.clone(),
                    attempts,
                });
                break Err(WardenError::StreamDegraded {
                    instrument: instrument.clone(),
                    attempts,
                });
            }

            self.ctx.health.mark_reconnecting(&instrument, &error).await;
            let delay = self.backoff(attempts);
            info!(
                instrument = %instrument,
                attempt = attempts,
                delay_secs = delay.as_secs(),
                "reconnecting market data stream"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.tasks.close();
        self.tasks.wait().await;
        if outcome.is_ok() {
            self.ctx.health.mark_stopped(&instrument).await;
            info!(instrument = %instrument, "stream supervisor stopped");
        }
        outcome
    }

    async fn consume(&mut self, mut stream: TickStream, shutdown: &CancellationToken) -> StreamEnd {
        let mut received: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };
            match next {
                Ok(Some(Ok(tick))) => {
                    received += 1;
                    self.on_tick(tick).await;
                }
                Ok(Some(Err(e))) => {
                    return StreamEnd::Dropped {
                        received,
                        error: e.to_string(),
                    }
                }
                Ok(None) => {
                    return StreamEnd::Dropped {
                        received,
                        error: "stream closed".to_string(),
                    }
                }
                Err(_) => {
                    return StreamEnd::Dropped {
                        received,
                        error: format!("no ticks for {}s", self.idle_timeout.as_secs()),
                    }
                }
            }
        }
    }

    /// Record the tick, then hand off exit or entry work without blocking the stream
    pub async fn on_tick(&mut self, tick: Tick) {
        if !tick.instrument.eq_ignore_ascii_case(&self.instrument) {
            debug!(instrument = %self.instrument, got = %tick.instrument, "tick for another instrument ignored");
            return;
        }
        self.ctx.health.record_tick(&self.instrument, tick.timestamp).await;
        self.window.push(tick.price, tick.timestamp);

        match self.ctx.executor.lifecycle(&self.instrument) {
            Lifecycle::Open => self.spawn_exit_check(tick),
            Lifecycle::None => self.maybe_enter().await,
            // open or close already in flight
            _ => {}
        }
    }

    fn spawn_exit_check(&self, tick: Tick) {
        if self.evaluating.swap(true, Ordering::AcqRel) {
            return;
        }
        let executor = Arc::clone(&self.ctx.executor);
        let flag = Arc::clone(&self.evaluating);
        let instrument = self.instrument.clone();
        self.tasks.spawn(async move {
            match executor.evaluate(&instrument, tick.price, Utc::now()).await {
                Ok(ExitOutcome::Sold(record)) => {
                    debug!(instrument = %instrument, record_id = %record.id, "exit on tick");
                }
                Ok(_) => {}
                Err(e) => warn!(instrument = %instrument, error = %e, "exit on tick failed"),
            }
            flag.store(false, Ordering::Release);
        });
    }

    async fn maybe_enter(&self) {
        if !self.window.is_full() || !self.ctx.executor.governor().allows_entries().await {
            return;
        }
        if self.entering.swap(true, Ordering::AcqRel) {
            return;
        }

        let ctx = self.ctx.clone();
        let flag = Arc::clone(&self.entering);
        let instrument = self.instrument.clone();
        let window = self.window.to_vec();
        let limit = self.score_timeout;
        let tag = self.strategy_tag.clone();
        self.tasks.spawn(async move {
            let signal = score_or_wait(ctx.scorer.as_ref(), &instrument, &window, limit, &tag).await;
            if signal.is_buy() {
                match ctx.executor.enter(&instrument, &signal, &window).await {
                    Ok(EntryOutcome::Opened(_)) => {}
                    Ok(outcome) => {
                        debug!(instrument = %instrument, outcome = ?outcome, confidence = signal.confidence, "buy signal not acted on")
                    }
                    Err(e) => error!(instrument = %instrument, error = %e, "entry attempt failed"),
                }
            }
            flag.store(false, Ordering::Release);
        });
    }
}
