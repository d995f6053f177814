pub mod binance;
pub mod gateway;
pub mod paper;
pub mod retry;
mod traits;

pub use binance::BinanceClient;
pub use gateway::OrderGateway;
pub use paper::PaperExchange;
pub use retry::RetryPolicy;
pub use traits::{ExchangeResult, TradingApi};
