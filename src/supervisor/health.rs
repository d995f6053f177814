//! Per-stream health registry

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Stream status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Registered, first connection pending
    Starting,
    Healthy,
    /// Between connection attempts
    Reconnecting,
    /// Reconnect budget exhausted; excluded from trading until restart
    Degraded,
    /// Stopped on shutdown
    Stopped,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStatus::Starting => write!(f, "starting"),
            StreamStatus::Healthy => write!(f, "healthy"),
            StreamStatus::Reconnecting => write!(f, "reconnecting"),
            StreamStatus::Degraded => write!(f, "degraded"),
            StreamStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Health information for one instrument stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHealth {
    pub instrument: String,
    pub status: StreamStatus,
    pub last_tick: Option<DateTime<Utc>>,
    pub reconnect_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct HealthRegistry {
    streams: RwLock<HashMap<String, StreamHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, instrument: &str) {
        let mut streams = self.streams.write().await;
        streams.insert(
            instrument.to_string(),
            StreamHealth {
                instrument: instrument.to_string(),
                status: StreamStatus::Starting,
                last_tick: None,
                reconnect_count: 0,
                last_error: None,
            },
        );
        debug!(instrument, "stream registered");
    }

    /// Record a tick; a reconnecting stream becomes healthy again
    pub async fn record_tick(&self, instrument: &str, at: DateTime<Utc>) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(instrument) {
            stream.last_tick = Some(at);
            match stream.status {
                StreamStatus::Reconnecting => {
                    stream.status = StreamStatus::Healthy;
                    info!(instrument, reconnects = stream.reconnect_count, "stream recovered");
                }
                StreamStatus::Starting => stream.status = StreamStatus::Healthy,
                _ => {}
            }
        }
    }

    pub async fn mark_reconnecting(&self, instrument: &str, error: &str) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(instrument) {
            if stream.status == StreamStatus::Degraded {
                return;
            }
            stream.status = StreamStatus::Reconnecting;
            stream.reconnect_count += 1;
            stream.last_error = Some(error.to_string());
            warn!(instrument, attempt = stream.reconnect_count, error, "stream reconnecting");
        }
    }

    pub async fn mark_degraded(&self, instrument: &str, error: &str) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(instrument) {
            stream.status = StreamStatus::Degraded;
            stream.last_error = Some(error.to_string());
            error!(instrument, error, "stream degraded, instrument excluded from trading");
        }
    }

    pub async fn mark_stopped(&self, instrument: &str) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(instrument) {
            if stream.status != StreamStatus::Degraded {
                stream.status = StreamStatus::Stopped;
            }
        }
    }

    pub async fn get(&self, instrument: &str) -> Option<StreamHealth> {
        self.streams.read().await.get(instrument).cloned()
    }

    /// All streams ordered by instrument
    pub async fn snapshot(&self) -> Vec<StreamHealth> {
        let mut all: Vec<StreamHealth> = self.streams.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    /// Unknown and degraded instruments are not tradable
    pub async fn is_tradable(&self, instrument: &str) -> bool {
        matches!(
            self.streams.read().await.get(instrument).map(|s| s.status),
            Some(StreamStatus::Healthy | StreamStatus::Reconnecting | StreamStatus::Starting)
        )
    }

    pub async fn degraded(&self) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|s| s.status == StreamStatus::Degraded)
            .map(|s| s.instrument)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_then_recover() {
        let registry = HealthRegistry::new();
        registry.register("BTCUSDT").await;
        registry.record_tick("BTCUSDT", Utc::now()).await;
        registry.mark_reconnecting("BTCUSDT", "closed by peer").await;
        registry.mark_reconnecting("BTCUSDT", "timeout").await;

        let health = registry.get("BTCUSDT").await.unwrap();
        assert_eq!(health.status, StreamStatus::Reconnecting);
        assert_eq!(health.reconnect_count, 2);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));

        registry.record_tick("BTCUSDT", Utc::now()).await;
        assert_eq!(
            registry.get("BTCUSDT").await.unwrap().status,
            StreamStatus::Healthy
        );
    }

    #[tokio::test]
    async fn degraded_is_sticky_and_untradable() {
        let registry = HealthRegistry::new();
        registry.register("ETHUSDT").await;
        registry.mark_degraded("ETHUSDT", "gave up").await;
        registry.mark_reconnecting("ETHUSDT", "late").await;
        registry.mark_stopped("ETHUSDT").await;
        registry.record_tick("ETHUSDT", Utc::now()).await;

        assert_eq!(
            registry.get("ETHUSDT").await.unwrap().status,
            StreamStatus::Degraded
        );
        assert!(!registry.is_tradable("ETHUSDT").await);
        assert!(!registry.is_tradable("UNKNOWN").await);
        assert_eq!(registry.degraded().await, vec!["ETHUSDT".to_string()]);
    }
}
