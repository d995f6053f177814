use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much to buy with a market order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BuyAmount {
    /// Base-asset quantity
    Quantity(Decimal),
    /// Quote-asset amount to spend
    Notional(Decimal),
}

/// One execution reported by the exchange for a market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Raw market order result as returned by the trading API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub fills: Vec<ExchangeFill>,
    pub transact_time: DateTime<Utc>,
}

/// Fee charged on one fill, with its value in the quote currency when known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeDetail {
    pub asset: String,
    pub amount: Decimal,
    pub quote_value: Option<Decimal>,
}

/// Normalized fill summary for a completed market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub order_id: String,
    pub instrument: String,
    pub base_asset: String,
    pub side: OrderSide,
    /// Gross executed base quantity
    pub filled_qty: Decimal,
    /// Base quantity actually gained (buy) or given up (sell) after base-asset commissions
    pub net_qty: Decimal,
    /// Volume-weighted average execution price over all fills
    pub avg_price: Decimal,
    /// Quote currency moved before fees
    pub gross_quote: Decimal,
    /// Total fees expressed in the quote currency
    pub fee_quote: Decimal,
    pub fees: Vec<FeeDetail>,
    pub filled_at: DateTime<Utc>,
}

impl FillResult {
    /// Effective price per unit of base asset once fees are included.
    ///
    /// Buys: quote spent (plus quote fees) per unit received.
    /// Sells: quote received (minus quote fees) per unit given up.
    pub fn effective_price(&self) -> Decimal {
        if self.net_qty.is_zero() {
            return self.avg_price;
        }
        match self.side {
            OrderSide::Buy => (self.gross_quote + self.quote_fee_excluding_base()) / self.net_qty,
            OrderSide::Sell => (self.gross_quote - self.quote_fee_excluding_base()) / self.filled_qty,
        }
    }

    /// Fees not already reflected in `net_qty`
    fn quote_fee_excluding_base(&self) -> Decimal {
        match self.side {
            // Base-asset commissions on buys already shrank net_qty
            OrderSide::Buy => self.fee_quote - self.base_fee_quote(),
            OrderSide::Sell => self.fee_quote,
        }
    }

    fn base_fee_quote(&self) -> Decimal {
        let base_fee: Decimal = self
            .fees
            .iter()
            .filter(|f| f.asset == self.base_asset)
            .filter_map(|f| f.quote_value)
            .sum();
        base_fee
    }
}

/// Why the gateway declined to submit an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    BelowMinQty { qty: Decimal, min_qty: Decimal },
    BelowMinNotional { notional: Decimal, min_notional: Decimal },
    ZeroQuantity,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::BelowMinQty { qty, min_qty } => {
                write!(f, "BELOW_MIN_QTY({} < {})", qty, min_qty)
            }
            SkipReason::BelowMinNotional {
                notional,
                min_notional,
            } => write!(f, "BELOW_MIN_NOTIONAL({} < {})", notional, min_notional),
            SkipReason::ZeroQuantity => write!(f, "ZERO_QUANTITY"),
        }
    }
}

/// Result of a gateway order call: filled, or declined locally without a network call
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled(FillResult),
    Skipped(SkipReason),
}

/// Free and locked balance of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Account composition at a point in time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balances: BTreeMap<String, AssetBalance>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl AccountSnapshot {
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.total())
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy_fill(fee_quote: Decimal, fees: Vec<FeeDetail>, net_qty: Decimal) -> FillResult {
        FillResult {
            order_id: "1".into(),
            instrument: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            side: OrderSide::Buy,
            filled_qty: dec!(2),
            net_qty,
            avg_price: dec!(100),
            gross_quote: dec!(200),
            fee_quote,
            fees,
            filled_at: Utc::now(),
        }
    }

    #[test]
    fn effective_buy_price_includes_quote_fee() {
        let fill = buy_fill(
            dec!(0.2),
            vec![FeeDetail {
                asset: "USDT".into(),
                amount: dec!(0.2),
                quote_value: Some(dec!(0.2)),
            }],
            dec!(2),
        );
        assert_eq!(fill.effective_price(), dec!(100.1));
    }

    #[test]
    fn effective_buy_price_with_base_fee_uses_net_qty() {
        // 0.002 BTC commission worth 0.2 USDT: 200 spent for 1.998 BTC
        let fill = buy_fill(
            dec!(0.2),
            vec![FeeDetail {
                asset: "BTC".into(),
                amount: dec!(0.002),
                quote_value: Some(dec!(0.2)),
            }],
            dec!(1.998),
        );
        assert_eq!(fill.effective_price(), dec!(200) / dec!(1.998));
    }

    #[test]
    fn account_snapshot_lookups_default_to_zero() {
        let mut snap = AccountSnapshot::default();
        snap.balances.insert(
            "USDT".into(),
            AssetBalance {
                free: dec!(90),
                locked: dec!(10),
            },
        );
        assert_eq!(snap.free("USDT"), dec!(90));
        assert_eq!(snap.total("USDT"), dec!(100));
        assert_eq!(snap.total("BTC"), dec!(0));
    }
}
