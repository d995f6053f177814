//! Trade and health notifications
//!
//! Delivery is fire-and-forget: `notify` never blocks the caller and a failed
//! webhook only produces a log line.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::ExitReason;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    PositionOpened {
        instrument: String,
        quantity: Decimal,
        entry_price: Decimal,
        strategy_tag: String,
    },
    PositionClosed {
        instrument: String,
        quantity: Decimal,
        exit_price: Decimal,
        realized_pnl: Decimal,
        reason: ExitReason,
        full_close: bool,
    },
    PositionAdopted {
        instrument: String,
        quantity: Decimal,
        entry_price: Decimal,
    },
    GovernorBand {
        from: String,
        to: String,
        realized_pnl: Decimal,
    },
    StreamDegraded {
        instrument: String,
        attempts: u32,
    },
}

impl Notification {
    /// One-line human readable summary
    pub fn text(&self) -> String {
        match self {
            Notification::PositionOpened {
                instrument,
                quantity,
                entry_price,
                strategy_tag,
            } => format!(
                "🟢 OPENED {} qty={} @ {} [{}]",
                instrument, quantity, entry_price, strategy_tag
            ),
            Notification::PositionClosed {
                instrument,
                quantity,
                exit_price,
                realized_pnl,
                reason,
                full_close,
            } => {
                let emoji = if realized_pnl.is_sign_negative() { "📉" } else { "📈" };
                let kind = if *full_close { "CLOSED" } else { "PARTIAL" };
                format!(
                    "{} {} {} qty={} @ {} PnL={} ({})",
                    emoji, kind, instrument, quantity, exit_price, realized_pnl, reason
                )
            }
            Notification::PositionAdopted {
                instrument,
                quantity,
                entry_price,
            } => format!("ADOPTED {} qty={} @ {}", instrument, quantity, entry_price),
            Notification::GovernorBand {
                from,
                to,
                realized_pnl,
            } => format!("Daily goal: {} -> {} (realized {})", from, to, realized_pnl),
            Notification::StreamDegraded {
                instrument,
                attempts,
            } => format!(
                "⚠️ {} stream degraded after {} reconnect attempts; trading disabled",
                instrument, attempts
            ),
        }
    }
}

/// Sink for notification events
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Notification);
}

/// Logs events only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Notification) {
        info!(notification = %event.text(), "notify");
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    event: &'a Notification,
}

/// Posts each event as JSON to a webhook
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: Arc<str>,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            webhook_url: Arc::from(webhook_url.into()),
        }
    }

    async fn send(client: Client, url: Arc<str>, event: Notification) {
        let payload = WebhookPayload {
            text: event.text(),
            event: &event,
        };
        match client.post(url.as_ref()).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("webhook notification sent");
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                error!("webhook notification failed: {} - {}", status, body);
            }
            Err(e) => error!("webhook request failed: {}", e),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: Notification) {
        info!(notification = %event.text(), "notify");
        let client = self.client.clone();
        let url = self.webhook_url.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::send(client, url, event));
            }
            Err(_) => debug!("no runtime, webhook notification dropped"),
        }
    }
}

/// Webhook when configured, log-only otherwise
pub fn build_notifier(webhook_url: Option<&str>, timeout: Duration) -> Arc<dyn Notifier> {
    match webhook_url.filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            info!("webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url, timeout))
        }
        None => Arc::new(LogNotifier),
    }
}
