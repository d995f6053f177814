use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{ExchangeResult, TradingApi};
use crate::domain::{
    AccountSnapshot, AssetBalance, BuyAmount, ExchangeFill, ExchangeOrder, OrderSide,
    SymbolFilters,
};
use crate::error::ExchangeError;

/// Dry-run exchange: real public market data, simulated fills and balances.
///
/// Fills execute in full at the current ticker; the taker fee is charged in
/// the quote asset.
pub struct PaperExchange {
    market: Arc<dyn TradingApi>,
    quote_asset: String,
    taker_fee: Decimal,
    balances: RwLock<BTreeMap<String, Decimal>>,
    next_order_id: AtomicU64,
}

impl PaperExchange {
    pub fn new(
        market: Arc<dyn TradingApi>,
        quote_asset: impl Into<String>,
        starting_quote: Decimal,
        taker_fee: Decimal,
    ) -> Self {
        let quote_asset = quote_asset.into();
        let mut balances = BTreeMap::new();
        balances.insert(quote_asset.clone(), starting_quote);
        Self {
            market,
            quote_asset,
            taker_fee,
            balances: RwLock::new(balances),
            next_order_id: AtomicU64::new(1),
        }
    }

    fn order_id(&self) -> String {
        format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::Relaxed))
    }

    fn fill(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        qty: Decimal,
        fee: Decimal,
    ) -> ExchangeOrder {
        ExchangeOrder {
            order_id: self.order_id(),
            symbol: symbol.to_string(),
            side,
            executed_qty: qty,
            cumulative_quote_qty: price * qty,
            fills: vec![ExchangeFill {
                price,
                qty,
                commission: fee,
                commission_asset: self.quote_asset.clone(),
            }],
            transact_time: Utc::now(),
        }
    }
}

#[async_trait]
impl TradingApi for PaperExchange {
    fn name(&self) -> &'static str {
        "paper"
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        self.market.symbol_info(symbol).await
    }

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.market.ticker_price(symbol).await
    }

    async fn market_buy(&self, symbol: &str, amount: BuyAmount) -> ExchangeResult<ExchangeOrder> {
        let filters = self.market.symbol_info(symbol).await?;
        let price = self.market.ticker_price(symbol).await?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!("no price for {}", symbol)));
        }
        let qty = match amount {
            BuyAmount::Quantity(qty) => qty,
            BuyAmount::Notional(quote) => filters.floor_qty(quote / price),
        };
        let cost = price * qty;
        let fee = cost * self.taker_fee;

        let mut balances = self.balances.write().await;
        let quote = balances.entry(self.quote_asset.clone()).or_default();
        if *quote < cost + fee {
            return Err(ExchangeError::Rejected(format!(
                "-2010: insufficient {} balance ({} < {})",
                self.quote_asset,
                quote,
                cost + fee
            )));
        }
        *quote -= cost + fee;
        *balances.entry(filters.base_asset.clone()).or_default() += qty;
        drop(balances);

        info!(symbol, %qty, %price, %fee, "paper buy filled");
        Ok(self.fill(symbol, OrderSide::Buy, price, qty, fee))
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<ExchangeOrder> {
        let filters = self.market.symbol_info(symbol).await?;
        let price = self.market.ticker_price(symbol).await?;
        let proceeds = price * quantity;
        let fee = proceeds * self.taker_fee;

        let mut balances = self.balances.write().await;
        let base = balances.entry(filters.base_asset.clone()).or_default();
        if *base < quantity {
            return Err(ExchangeError::Rejected(format!(
                "-2010: insufficient {} balance ({} < {})",
                filters.base_asset, base, quantity
            )));
        }
        *base -= quantity;
        *balances.entry(self.quote_asset.clone()).or_default() += proceeds - fee;
        drop(balances);

        info!(symbol, %quantity, %price, %fee, "paper sell filled");
        Ok(self.fill(symbol, OrderSide::Sell, price, quantity, fee))
    }

    async fn account(&self) -> ExchangeResult<AccountSnapshot> {
        let balances = self.balances.read().await;
        Ok(AccountSnapshot {
            balances: balances
                .iter()
                .filter(|(_, v)| !v.is_zero())
                .map(|(asset, free)| {
                    (
                        asset.clone(),
                        AssetBalance {
                            free: *free,
                            locked: Decimal::ZERO,
                        },
                    )
                })
                .collect(),
            taken_at: Some(Utc::now()),
        })
    }

    async fn server_time(&self) -> ExchangeResult<i64> {
        Ok(Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FixedMarket;

    #[async_trait]
    impl TradingApi for FixedMarket {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
            Ok(SymbolFilters {
                symbol: symbol.to_string(),
                base_asset: "ETH".into(),
                quote_asset: "USDT".into(),
                qty_step: dec!(0.001),
                price_step: dec!(0.01),
                min_qty: dec!(0.001),
                min_notional: dec!(5),
            })
        }
        async fn ticker_price(&self, _symbol: &str) -> ExchangeResult<Decimal> {
            Ok(dec!(2000))
        }
        async fn market_buy(&self, _: &str, _: BuyAmount) -> ExchangeResult<ExchangeOrder> {
            Err(ExchangeError::Rejected("read only".into()))
        }
        async fn market_sell(&self, _: &str, _: Decimal) -> ExchangeResult<ExchangeOrder> {
            Err(ExchangeError::Rejected("read only".into()))
        }
        async fn account(&self) -> ExchangeResult<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }
        async fn server_time(&self) -> ExchangeResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn simulated_round_trip_charges_fees_both_ways() {
        let paper = PaperExchange::new(Arc::new(FixedMarket), "USDT", dec!(1000), dec!(0.001));

        let buy = paper
            .market_buy("ETHUSDT", BuyAmount::Notional(dec!(200)))
            .await
            .unwrap();
        assert_eq!(buy.executed_qty, dec!(0.1));
        assert_eq!(buy.fills[0].commission, dec!(0.2));

        let account = paper.account().await.unwrap();
        assert_eq!(account.free("USDT"), dec!(799.8));
        assert_eq!(account.free("ETH"), dec!(0.1));

        paper.market_sell("ETHUSDT", dec!(0.1)).await.unwrap();
        let account = paper.account().await.unwrap();
        assert_eq!(account.free("USDT"), dec!(999.6));
        assert_eq!(account.free("ETH"), dec!(0));
    }

    #[tokio::test]
    async fn overselling_is_rejected() {
        let paper = PaperExchange::new(Arc::new(FixedMarket), "USDT", dec!(1000), dec!(0.001));
        let err = paper.market_sell("ETHUSDT", dec!(1)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(_)));
    }
}
