use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{no_resync, with_timeout, RetryPolicy};
use super::{ExchangeResult, TradingApi};
use crate::domain::{
    AccountSnapshot, BuyAmount, ExchangeOrder, FeeDetail, FillResult, OrderOutcome, OrderSide,
    SkipReason, SymbolFilters,
};
use crate::error::{ExchangeError, Result, WardenError};

/// Precision-aware, retrying front for the trading API.
///
/// Quantities are floored to the lot step and checked against `minQty` and
/// `minNotional` before any order leaves the process. Every call runs under a
/// timeout and the retry policy; clock-skew errors resync the signing clock.
pub struct OrderGateway {
    api: Arc<dyn TradingApi>,
    quote_asset: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    filters: DashMap<String, SymbolFilters>,
}

impl OrderGateway {
    pub fn new(
        api: Arc<dyn TradingApi>,
        quote_asset: impl Into<String>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            api,
            quote_asset: quote_asset.into(),
            retry,
            call_timeout,
            filters: DashMap::new(),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub fn is_dry_run(&self) -> bool {
        self.api.is_dry_run()
    }

    async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let limit = self.call_timeout;
        self.retry
            .run(label, || with_timeout(limit, op()), || self.resync_clock())
            .await
            .map_err(WardenError::from)
    }

    /// Measure the offset between the exchange clock and ours and apply it to signing
    pub async fn resync_clock(&self) -> ExchangeResult<()> {
        let before = chrono::Utc::now().timestamp_millis();
        let server = with_timeout(self.call_timeout, self.api.server_time()).await?;
        let after = chrono::Utc::now().timestamp_millis();
        let offset = server - (before + after) / 2;
        info!(offset_ms = offset, "clock resynchronized with exchange");
        self.api.set_time_offset(offset);
        Ok(())
    }

    /// Lot step, tick size, minimum quantity and notional for an instrument (cached)
    pub async fn symbol_precision(&self, instrument: &str) -> Result<SymbolFilters> {
        if let Some(cached) = self.filters.get(instrument) {
            return Ok(cached.clone());
        }
        let filters = self
            .call("symbol_info", || self.api.symbol_info(instrument))
            .await?;
        debug!(
            instrument,
            qty_step = %filters.qty_step,
            min_qty = %filters.min_qty,
            min_notional = %filters.min_notional,
            "symbol filters loaded"
        );
        self.filters.insert(instrument.to_string(), filters.clone());
        Ok(filters)
    }

    pub async fn ticker(&self, instrument: &str) -> Result<Decimal> {
        self.call("ticker", || self.api.ticker_price(instrument))
            .await
    }

    pub async fn account(&self) -> Result<AccountSnapshot> {
        self.call("account", || self.api.account()).await
    }

    /// Local pre-trade check; `None` means the order may be submitted
    pub fn check_order(filters: &SymbolFilters, qty: Decimal, price: Decimal) -> Option<SkipReason> {
        if qty <= Decimal::ZERO {
            return Some(SkipReason::ZeroQuantity);
        }
        if qty < filters.min_qty {
            return Some(SkipReason::BelowMinQty {
                qty,
                min_qty: filters.min_qty,
            });
        }
        let notional = qty * price;
        if notional < filters.min_notional {
            return Some(SkipReason::BelowMinNotional {
                notional,
                min_notional: filters.min_notional,
            });
        }
        None
    }

    pub async fn buy(&self, instrument: &str, amount: BuyAmount) -> Result<OrderOutcome> {
        let filters = self.symbol_precision(instrument).await?;

        let amount = match amount {
            BuyAmount::Quantity(raw) => {
                let qty = filters.floor_qty(raw);
                let price = self.ticker(instrument).await?;
                if let Some(reason) = Self::check_order(&filters, qty, price) {
                    debug!(instrument, %reason, "buy skipped locally");
                    return Ok(OrderOutcome::Skipped(reason));
                }
                BuyAmount::Quantity(qty)
            }
            BuyAmount::Notional(quote) => {
                if quote < filters.min_notional || quote <= Decimal::ZERO {
                    let reason = SkipReason::BelowMinNotional {
                        notional: quote,
                        min_notional: filters.min_notional,
                    };
                    debug!(instrument, %reason, "buy skipped locally");
                    return Ok(OrderOutcome::Skipped(reason));
                }
                BuyAmount::Notional(quote)
            }
        };

        let order = self
            .call("market_buy", || self.api.market_buy(instrument, amount))
            .await?;
        let fill = self.normalize(order, &filters).await?;
        info!(
            instrument,
            order_id = %fill.order_id,
            qty = %fill.filled_qty,
            avg_price = %fill.avg_price,
            fee_quote = %fill.fee_quote,
            "buy filled"
        );
        Ok(OrderOutcome::Filled(fill))
    }

    pub async fn sell(&self, instrument: &str, qty: Decimal) -> Result<OrderOutcome> {
        let filters = self.symbol_precision(instrument).await?;
        let qty = filters.floor_qty(qty);
        let price = self.ticker(instrument).await?;
        if let Some(reason) = Self::check_order(&filters, qty, price) {
            debug!(instrument, %reason, "sell skipped locally");
            return Ok(OrderOutcome::Skipped(reason));
        }

        let order = self
            .call("market_sell", || self.api.market_sell(instrument, qty))
            .await?;
        let fill = self.normalize(order, &filters).await?;
        info!(
            instrument,
            order_id = %fill.order_id,
            qty = %fill.filled_qty,
            avg_price = %fill.avg_price,
            fee_quote = %fill.fee_quote,
            "sell filled"
        );
        Ok(OrderOutcome::Filled(fill))
    }

    /// Price third-asset commissions in the quote currency, then summarize the order
    async fn normalize(&self, order: ExchangeOrder, filters: &SymbolFilters) -> Result<FillResult> {
        let mut rates: HashMap<String, Decimal> = HashMap::new();
        for fill in &order.fills {
            let asset = &fill.commission_asset;
            if fill.commission.is_zero()
                || *asset == filters.quote_asset
                || *asset == filters.base_asset
                || rates.contains_key(asset)
            {
                continue;
            }
            let pair = format!("{}{}", asset, filters.quote_asset);
            let rate = self
                .retry_free_ticker(&pair)
                .await
                .map_err(|e| warn!(asset = %asset, error = %e, "fee asset unpriced, counting as zero"))
                .ok();
            if let Some(rate) = rate {
                rates.insert(asset.clone(), rate);
            }
        }
        summarize(order, filters, &rates)
    }

    async fn retry_free_ticker(&self, pair: &str) -> ExchangeResult<Decimal> {
        RetryPolicy::no_retry()
            .run(
                "fee_ticker",
                || with_timeout(self.call_timeout, self.api.ticker_price(pair)),
                no_resync,
            )
            .await
    }
}

/// Summarize a raw order into a [`FillResult`].
///
/// Average price is the volume-weighted mean over every fill. Fees are all
/// normalized to the quote currency before they are reported: quote-asset
/// commissions as-is, base-asset commissions at the fill price, and other
/// assets at `rates` (missing rates count as zero). On buys, base-asset
/// commissions also reduce the quantity actually received.
pub fn summarize(
    order: ExchangeOrder,
    filters: &SymbolFilters,
    rates: &HashMap<String, Decimal>,
) -> Result<FillResult> {
    let fill_qty: Decimal = order.fills.iter().map(|f| f.qty).sum();
    let filled_qty = if order.executed_qty > Decimal::ZERO {
        order.executed_qty
    } else {
        fill_qty
    };
    if filled_qty <= Decimal::ZERO {
        return Err(ExchangeError::Rejected(format!(
            "order {} on {} reported no fill",
            order.order_id, order.symbol
        ))
        .into());
    }

    let gross_quote = if order.fills.is_empty() {
        order.cumulative_quote_qty
    } else {
        order.fills.iter().map(|f| f.price * f.qty).sum()
    };
    let avg_price = gross_quote / filled_qty;

    let mut fees = Vec::with_capacity(order.fills.len());
    let mut base_commission = Decimal::ZERO;
    for fill in &order.fills {
        if fill.commission.is_zero() {
            continue;
        }
        let quote_value = if fill.commission_asset == filters.quote_asset {
            Some(fill.commission)
        } else if fill.commission_asset == filters.base_asset {
            base_commission += fill.commission;
            Some(fill.commission * fill.price)
        } else {
            rates
                .get(&fill.commission_asset)
                .map(|rate| fill.commission * rate)
        };
        fees.push(FeeDetail {
            asset: fill.commission_asset.clone(),
            amount: fill.commission,
            quote_value,
        });
    }
    let fee_quote: Decimal = fees.iter().filter_map(|f| f.quote_value).sum();

    let net_qty = match order.side {
        OrderSide::Buy => filled_qty - base_commission,
        OrderSide::Sell => filled_qty,
    };

    Ok(FillResult {
        order_id: order.order_id,
        instrument: order.symbol,
        base_asset: filters.base_asset.clone(),
        side: order.side,
        filled_qty,
        net_qty,
        avg_price,
        gross_quote,
        fee_quote,
        fees,
        filled_at: order.transact_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExchangeFill;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "SOLUSDT".into(),
            base_asset: "SOL".into(),
            quote_asset: "USDT".into(),
            qty_step: dec!(0.01),
            price_step: dec!(0.01),
            min_qty: dec!(0.01),
            min_notional: dec!(5),
        }
    }

    fn order(side: OrderSide, fills: Vec<ExchangeFill>) -> ExchangeOrder {
        ExchangeOrder {
            order_id: "7".into(),
            symbol: "SOLUSDT".into(),
            side,
            executed_qty: fills.iter().map(|f| f.qty).sum(),
            cumulative_quote_qty: fills.iter().map(|f| f.qty * f.price).sum(),
            fills,
            transact_time: Utc::now(),
        }
    }

    fn fill(price: Decimal, qty: Decimal, commission: Decimal, asset: &str) -> ExchangeFill {
        ExchangeFill {
            price,
            qty,
            commission,
            commission_asset: asset.into(),
        }
    }

    #[test]
    fn average_price_is_volume_weighted_across_fee_assets() {
        let order = order(
            OrderSide::Buy,
            vec![
                fill(dec!(100), dec!(1), dec!(0.001), "BNB"),
                fill(dec!(103), dec!(2), dec!(0.2), "USDT"),
            ],
        );
        let mut rates = HashMap::new();
        rates.insert("BNB".to_string(), dec!(500));

        let result = summarize(order, &filters(), &rates).unwrap();
        assert_eq!(result.avg_price, dec!(102));
        assert_eq!(result.fee_quote, dec!(0.7));
        assert_eq!(result.net_qty, dec!(3));
    }

    #[test]
    fn base_asset_commission_reduces_received_quantity() {
        let order = order(
            OrderSide::Buy,
            vec![fill(dec!(100), dec!(2), dec!(0.002), "SOL")],
        );
        let result = summarize(order, &filters(), &HashMap::new()).unwrap();
        assert_eq!(result.net_qty, dec!(1.998));
        assert_eq!(result.fee_quote, dec!(0.2));
    }

    #[test]
    fn unpriced_fee_asset_counts_as_zero() {
        let order = order(
            OrderSide::Sell,
            vec![fill(dec!(100), dec!(1), dec!(0.01), "XYZ")],
        );
        let result = summarize(order, &filters(), &HashMap::new()).unwrap();
        assert_eq!(result.fee_quote, dec!(0));
        assert_eq!(result.fees[0].quote_value, None);
    }

    #[test]
    fn empty_fill_is_an_error() {
        let order = order(OrderSide::Buy, vec![]);
        assert!(summarize(order, &filters(), &HashMap::new()).is_err());
    }

    #[test]
    fn pre_trade_checks() {
        let f = filters();
        assert_eq!(
            OrderGateway::check_order(&f, dec!(0), dec!(100)),
            Some(SkipReason::ZeroQuantity)
        );
        assert!(matches!(
            OrderGateway::check_order(&f, dec!(0.001), dec!(100)),
            Some(SkipReason::BelowMinQty { .. })
        ));
        assert!(matches!(
            OrderGateway::check_order(&f, dec!(0.04), dec!(100)),
            Some(SkipReason::BelowMinNotional { .. })
        ));
        assert_eq!(OrderGateway::check_order(&f, dec!(0.05), dec!(100)), None);
    }
}
