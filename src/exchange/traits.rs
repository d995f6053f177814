use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{AccountSnapshot, BuyAmount, ExchangeOrder, SymbolFilters};
use crate::error::ExchangeError;

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Spot trading API consumed by the order gateway.
///
/// Implementations return raw exchange payloads; precision rounding, retries,
/// timeouts and fee normalization live in [`super::OrderGateway`].
#[async_trait]
pub trait TradingApi: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_dry_run(&self) -> bool {
        false
    }

    async fn symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolFilters>;

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn market_buy(&self, symbol: &str, amount: BuyAmount) -> ExchangeResult<ExchangeOrder>;

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<ExchangeOrder>;

    async fn account(&self) -> ExchangeResult<AccountSnapshot>;

    /// Exchange clock in epoch milliseconds
    async fn server_time(&self) -> ExchangeResult<i64>;

    /// Offset (server minus local, ms) applied to signed request timestamps
    fn set_time_offset(&self, _offset_ms: i64) {}
}
