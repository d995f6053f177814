use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{ExchangeResult, TradingApi};
use crate::config::{Credentials, ExchangeConfig};
use crate::domain::{
    AccountSnapshot, AssetBalance, BuyAmount, ExchangeFill, ExchangeOrder, OrderSide,
    SymbolFilters,
};
use crate::error::{ExchangeError, Result, WardenError};

type HmacSha256 = Hmac<Sha256>;

/// Timestamp outside of recvWindow
const CODE_CLOCK_SKEW: i64 = -1021;
const AUTH_CODES: [i64; 3] = [-1022, -2014, -2015];
/// Filter failures, insufficient balance, unknown symbol
const REJECT_CODES: [i64; 4] = [-1013, -1121, -2010, -2011];

/// Binance spot REST client
pub struct BinanceClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
    time_offset_ms: AtomicI64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderFull {
    symbol: String,
    order_id: i64,
    transact_time: i64,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
    side: String,
    #[serde(default)]
    fills: Vec<FillEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillEntry {
    price: Decimal,
    qty: Decimal,
    commission: Decimal,
    commission_asset: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

impl BinanceClient {
    pub fn new(cfg: &ExchangeConfig, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("warden/0.1")
            .timeout(Duration::from_millis(cfg.call_timeout_ms))
            .build()
            .map_err(|e| WardenError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: cfg.rest_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms: cfg.recv_window_ms,
            time_offset_ms: AtomicI64::new(0),
        })
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(secret: &str, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Auth(format!("invalid API secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let query = encode_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let resp = self.http.get(&url).send().await?;
        Self::decode(path, resp).await
    }

    async fn signed<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Auth("API credentials are not configured".to_string()))?;

        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("recvWindow", self.recv_window_ms.to_string()));
        all.push(("timestamp", self.timestamp_ms().to_string()));
        let query = encode_query(&all);
        let signature = Self::sign(&creds.api_secret, &query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query, signature
        );

        debug!(method = %method, path, "signed request");
        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        Self::decode(path, resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if !(200..300).contains(&status) {
            return Err(classify(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("{}: {}", path, e)))
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        ser.append_pair(k, v);
    }
    ser.finish()
}

/// Map an HTTP status and error body to the exchange error taxonomy
pub fn classify(status: u16, body: &str) -> ExchangeError {
    if status == 429 || status == 418 {
        return ExchangeError::RateLimited(format!("status {}: {}", status, body));
    }
    if status >= 500 {
        return ExchangeError::Network(format!("status {}: {}", status, body));
    }
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if err.code == CODE_CLOCK_SKEW => ExchangeError::ClockSkew(err.msg),
        Ok(err) if AUTH_CODES.contains(&err.code) => ExchangeError::Auth(err.msg),
        Ok(err) if REJECT_CODES.contains(&err.code) => {
            ExchangeError::Rejected(format!("{}: {}", err.code, err.msg))
        }
        Ok(err) => ExchangeError::Api {
            code: err.code,
            message: err.msg,
        },
        Err(_) if status == 401 || status == 403 => ExchangeError::Auth(body.to_string()),
        Err(_) => ExchangeError::Api {
            code: status as i64,
            message: body.to_string(),
        },
    }
}

fn parse_filters(info: SymbolInfo) -> SymbolFilters {
    let mut filters = SymbolFilters {
        symbol: info.symbol,
        base_asset: info.base_asset,
        quote_asset: info.quote_asset,
        qty_step: Decimal::ZERO,
        price_step: Decimal::ZERO,
        min_qty: Decimal::ZERO,
        min_notional: Decimal::ZERO,
    };
    let field = |f: &Value, key: &str| {
        f.get(key)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Decimal>().ok())
    };
    for f in &info.filters {
        match f.get("filterType").and_then(Value::as_str) {
            Some("LOT_SIZE") => {
                filters.qty_step = field(f, "stepSize").unwrap_or_default();
                filters.min_qty = field(f, "minQty").unwrap_or_default();
            }
            Some("PRICE_FILTER") => {
                filters.price_step = field(f, "tickSize").unwrap_or_default();
            }
            Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                filters.min_notional = field(f, "minNotional").unwrap_or_default();
            }
            _ => {}
        }
    }
    filters
}

fn to_order(raw: OrderFull) -> ExchangeResult<ExchangeOrder> {
    let side = match raw.side.as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        other => return Err(ExchangeError::Decode(format!("unknown side {}", other))),
    };
    let transact_time = Utc
        .timestamp_millis_opt(raw.transact_time)
        .single()
        .unwrap_or_else(Utc::now);
    Ok(ExchangeOrder {
        order_id: raw.order_id.to_string(),
        symbol: raw.symbol,
        side,
        executed_qty: raw.executed_qty,
        cumulative_quote_qty: raw.cummulative_quote_qty,
        fills: raw
            .fills
            .into_iter()
            .map(|f| ExchangeFill {
                price: f.price,
                qty: f.qty,
                commission: f.commission,
                commission_asset: f.commission_asset,
            })
            .collect(),
        transact_time,
    })
}

#[async_trait]
impl TradingApi for BinanceClient {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        info.symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .map(parse_filters)
            .ok_or_else(|| ExchangeError::Rejected(format!("unknown symbol {}", symbol)))
    }

    async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let ticker: TickerPrice = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn market_buy(&self, symbol: &str, amount: BuyAmount) -> ExchangeResult<ExchangeOrder> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("side", "BUY".to_string()),
            ("type", "MARKET".to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        match amount {
            BuyAmount::Quantity(qty) => params.push(("quantity", qty.normalize().to_string())),
            BuyAmount::Notional(quote) => {
                params.push(("quoteOrderQty", quote.normalize().to_string()))
            }
        }
        let raw: OrderFull = self.signed(Method::POST, "/api/v3/order", &params).await?;
        to_order(raw)
    }

    async fn market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<ExchangeOrder> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        let raw: OrderFull = self.signed(Method::POST, "/api/v3/order", &params).await?;
        to_order(raw)
    }

    async fn account(&self) -> ExchangeResult<AccountSnapshot> {
        let info: AccountInfo = self.signed(Method::GET, "/api/v3/account", &[]).await?;
        let balances: BTreeMap<String, AssetBalance> = info
            .balances
            .into_iter()
            .filter(|b| !(b.free.is_zero() && b.locked.is_zero()))
            .map(|b| {
                (
                    b.asset,
                    AssetBalance {
                        free: b.free,
                        locked: b.locked,
                    },
                )
            })
            .collect();
        Ok(AccountSnapshot {
            balances,
            taken_at: Some(Utc::now()),
        })
    }

    async fn server_time(&self) -> ExchangeResult<i64> {
        let time: ServerTime = self.public_get("/api/v3/time", &[]).await?;
        Ok(time.server_time)
    }

    fn set_time_offset(&self, offset_ms: i64) {
        self.time_offset_ms.store(offset_ms, Ordering::Relaxed);
    }
}
