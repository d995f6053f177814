pub mod binance_ws;
pub mod webhook;

pub use binance_ws::{BinanceFeed, MarketFeed, TickStream};
pub use webhook::{build_notifier, LogNotifier, Notification, Notifier, WebhookNotifier};
