//! Binance WebSocket market data feed
//!
//! One aggregate-trade stream per instrument. Reconnection is owned by the
//! stream supervisor; this adapter only opens a connection and turns trade
//! messages into ticks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::Tick;
use crate::error::{Result, WardenError};

pub type TickStream = BoxStream<'static, Result<Tick>>;

/// Source of live price ticks for one instrument
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Open a fresh subscription; the stream ends or errors when the connection drops
    async fn subscribe(&self, instrument: &str) -> Result<TickStream>;
}

/// Aggregated trade message
#[derive(Debug, Deserialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
}

pub struct BinanceFeed {
    ws_url: String,
    connect_timeout: Duration,
}

impl BinanceFeed {
    pub fn new(ws_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    fn stream_url(&self, instrument: &str) -> String {
        format!("{}/{}@aggTrade", self.ws_url, instrument.to_lowercase())
    }
}

/// Parse an aggTrade payload into a tick; anything else is ignored
pub fn parse_agg_trade(text: &str) -> Option<Tick> {
    let trade = match serde_json::from_str::<BinanceAggTrade>(text) {
        Ok(t) if t.event_type == "aggTrade" => t,
        _ => {
            debug!(
                "Unrecognized Binance message: {}",
                text.chars().take(100).collect::<String>()
            );
            return None;
        }
    };
    let price = match trade.price.parse::<Decimal>() {
        Ok(p) if p > Decimal::ZERO => p,
        _ => {
            warn!(symbol = %trade.symbol, price = %trade.price, "unparseable trade price");
            return None;
        }
    };
    let timestamp = DateTime::from_timestamp_millis(trade.trade_time).unwrap_or_else(Utc::now);
    Some(Tick::new(trade.symbol, price, timestamp))
}

#[async_trait]
impl MarketFeed for BinanceFeed {
    async fn subscribe(&self, instrument: &str) -> Result<TickStream> {
        let url = Url::parse(&self.stream_url(instrument))
            .map_err(|e| WardenError::Internal(format!("Invalid WebSocket URL: {}", e)))?;

        info!(instrument, %url, "connecting to Binance WebSocket");
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                WardenError::MarketDataUnavailable(format!(
                    "{} WebSocket connection timeout",
                    instrument
                ))
            })??;
        info!(instrument, "connected to Binance WebSocket");

        let ticks = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => parse_agg_trade(&text).map(Ok),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "received close frame from Binance");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(WardenError::WebSocket(e))),
            }
        });
        Ok(ticks.boxed())
    }
}
