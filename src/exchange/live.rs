//! Binance USD-M futures REST client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    Balances, CurrencyBalance, ExchangeError, ExchangeGateway, Order, OrderRequest, Ticker, Venue,
};
use crate::models::{Candle, CandleSeries, Side};

type HmacSha256 = Hmac<Sha256>;

pub const LIVE_BASE_URL: &str = "https://fapi.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u64 = 60_000;

/// 24h ticker from /fapi/v1/ticker/24hr.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    last_price: Decimal,
    high_price: Option<Decimal>,
    low_price: Option<Decimal>,
    volume: Option<Decimal>,
    close_time: Option<i64>,
}

/// Asset row from /fapi/v2/balance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    asset: String,
    balance: Decimal,
    available_balance: Decimal,
}

/// Order acknowledgement from /fapi/v1/order.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    executed_qty: Option<Decimal>,
    #[serde(default)]
    avg_price: Option<Decimal>,
    #[serde(default)]
    update_time: Option<i64>,
}

/// Error body returned by the venue.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Client for the futures REST API.
pub struct LiveExchange {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl LiveExchange {
    /// Create a client against the production endpoint.
    pub fn new(api_key: String, api_secret: String) -> anyhow::Result<Self> {
        Self::with_base_url(LIVE_BASE_URL.to_string(), api_key, api_secret)
    }

    /// Create with custom base URL (for testnet).
    pub fn with_base_url(base_url: String, api_key: String, api_secret: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        sign_query(&self.api_secret, query)
    }

    /// Build a signed request: params + timestamp + recvWindow, then signature.
    fn signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<RequestBuilder, ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::Auth("API key and secret are required".to_string()));
        }

        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            RECV_WINDOW_MS,
            Utc::now().timestamp_millis()
        ));
        let signature = self.sign(&query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        Ok(self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key))
    }

    fn public(&self, path: &str, params: &[(&str, String)]) -> RequestBuilder {
        let query = encode_params(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        self.client.get(url)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, ExchangeError> {
        let response = request.send().await.map_err(|e| {
            warn!(operation = what, error = %e, "Request failed");
            ExchangeError::Connectivity(format!("{what}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(operation = what, status = %status, body = %body, "Exchange returned an error");
            return Err(classify_status(status, &body));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T, ExchangeError> {
        let response = self.send(request, what).await?;
        response
            .json()
            .await
            .map_err(|e| ExchangeError::Decode(format!("{what}: {e}")))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let request = self.signed(
            Method::POST,
            "/fapi/v1/leverage",
            &[("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
        )?;
        self.send(request, "set leverage").await?;
        info!(symbol, leverage, "Set leverage");
        Ok(())
    }

    /// Reduce-only trigger order on the closing side.
    async fn place_protective(
        &self,
        symbol: &str,
        pair: &str,
        side: Side,
        order_type: &str,
        trigger: Decimal,
        quantity: &str,
    ) -> Result<OrderResponse, ExchangeError> {
        let request = self.signed(
            Method::POST,
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("side", side.as_str().to_string()),
                ("type", order_type.to_string()),
                ("quantity", quantity.to_string()),
                ("stopPrice", format_price(pair, trigger)),
                ("reduceOnly", "true".to_string()),
                ("newClientOrderId", Uuid::new_v4().simple().to_string()),
            ],
        )?;
        self.json(request, order_type).await
    }
}

#[async_trait]
impl ExchangeGateway for LiveExchange {
    fn venue(&self) -> Venue {
        Venue::Live
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let request = self.public("/fapi/v1/ticker/24hr", &[("symbol", to_exchange_symbol(symbol))]);
        let ticker: TickerResponse = self.json(request, "fetch ticker").await?;
        debug!(symbol = %ticker.symbol, price = %ticker.last_price, "Fetched ticker");

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: ticker.last_price,
            high: ticker.high_price,
            low: ticker.low_price,
            volume: ticker.volume,
            timestamp: ticker.close_time.and_then(millis_to_datetime).unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<CandleSeries, ExchangeError> {
        let request = self.public(
            "/fapi/v1/klines",
            &[
                ("symbol", to_exchange_symbol(symbol)),
                ("interval", timeframe.to_string()),
                ("limit", limit.to_string()),
            ],
        );
        let rows: Vec<Vec<Value>> = self.json(request, "fetch klines").await?;
        let series = parse_klines(&rows)?.window(limit);
        debug!(symbol, bars = series.len(), "Fetched OHLCV");
        Ok(series)
    }

    async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let request = self.signed(Method::GET, "/fapi/v2/balance", &[])?;
        let rows: Vec<BalanceResponse> = self.json(request, "fetch balance").await?;
        Ok(balances_from(rows))
    }

    async fn create_market_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let symbol = to_exchange_symbol(&request.symbol);
        let quantity = format_quantity(request.amount);
        if quantity == "0" {
            return Err(ExchangeError::Rejected(format!(
                "quantity {} rounds to zero",
                request.amount
            )));
        }

        if request.leverage > 1 {
            self.set_leverage(&symbol, request.leverage).await?;
        }

        let client_id = Uuid::new_v4().simple().to_string();
        let params = market_order_params(request, &symbol, &quantity, client_id);
        let order_request = self.signed(Method::POST, "/fapi/v1/order", &params)?;
        let ack: OrderResponse = self.json(order_request, "market order").await?;
        info!(
            order_id = ack.order_id,
            side = %request.side,
            quantity = %quantity,
            symbol = %request.symbol,
            "Created market order"
        );

        // Protective exits are best effort
        let exit_side = request.side.opposite();
        if let Some(stop) = request.stop_loss {
            match self
                .place_protective(&symbol, &request.symbol, exit_side, "STOP_MARKET", stop, &quantity)
                .await
            {
                Ok(o) => info!(order_id = o.order_id, price = %stop, "Set stop loss"),
                Err(e) => error!(error = %e, "Failed to set stop loss"),
            }
        }
        if let Some(target) = request.take_profit {
            match self
                .place_protective(&symbol, &request.symbol, exit_side, "TAKE_PROFIT_MARKET", target, &quantity)
                .await
            {
                Ok(o) => info!(order_id = o.order_id, price = %target, "Set take profit"),
                Err(e) => error!(error = %e, "Failed to set take profit"),
            }
        }

        Ok(Order {
            id: ack.order_id.to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            amount: ack.executed_qty.filter(|q| !q.is_zero()).unwrap_or(request.amount),
            price: ack.avg_price.filter(|p| !p.is_zero()),
            fee: Decimal::ZERO,
            status: ack.status,
            timestamp: ack.update_time.and_then(millis_to_datetime).unwrap_or_else(Utc::now),
        })
    }

    async fn is_connected(&self) -> bool {
        let request = self.public("/fapi/v1/ping", &[]);
        match self.send(request, "ping").await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Exchange connection check failed");
                false
            }
        }
    }
}

/// HMAC-SHA256 of `query` keyed with `secret`, hex encoded.
pub fn sign_query(secret: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Auth(format!("invalid secret: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `BTC/USDT` -> `BTCUSDT`.
pub fn to_exchange_symbol(symbol: &str) -> String {
    symbol.replace(['/', '-', '_'], "").to_uppercase()
}

/// Two decimals for BTC pairs, eight otherwise, trailing zeros dropped.
pub fn format_price(symbol: &str, price: Decimal) -> String {
    let dp = if symbol.to_uppercase().contains("BTC") { 2 } else { 8 };
    price.round_dp(dp).normalize().to_string()
}

/// Quantity truncated to three decimals so it never exceeds the requested amount.
pub fn format_quantity(amount: Decimal) -> String {
    amount
        .round_dp_with_strategy(3, RoundingStrategy::ToZero)
        .normalize()
        .to_string()
}

fn market_order_params(
    request: &OrderRequest,
    symbol: &str,
    quantity: &str,
    client_id: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", symbol.to_string()),
        ("side", request.side.as_str().to_string()),
        ("type", "MARKET".to_string()),
        ("quantity", quantity.to_string()),
    ];
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    params.push(("newClientOrderId", client_id));
    params.push(("newOrderRespType", "RESULT".to_string()));
    params
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Map an HTTP failure onto the transient / fatal split.
pub fn classify_status(status: StatusCode, body: &str) -> ExchangeError {
    let detail = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(e) => format!("{} (code {})", e.msg, e.code),
        Err(_) => format!("{status}: {body}"),
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => ExchangeError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExchangeError::Auth(detail),
        s if s.is_server_error() => ExchangeError::Connectivity(detail),
        StatusCode::REQUEST_TIMEOUT => ExchangeError::Connectivity(detail),
        _ => ExchangeError::Rejected(detail),
    }
}

/// Parse kline rows: `[openTime, open, high, low, close, volume, ...]`.
fn parse_klines(rows: &[Vec<Value>]) -> Result<CandleSeries, ExchangeError> {
    let candles = rows
        .iter()
        .map(|row| {
            if row.len() < 6 {
                return Err(ExchangeError::Decode(format!("kline row has {} fields", row.len())));
            }
            let open_time = row[0]
                .as_i64()
                .and_then(millis_to_datetime)
                .ok_or_else(|| ExchangeError::Decode(format!("bad kline open time: {}", row[0])))?;
            Ok(Candle::new(
                open_time,
                number(&row[1])?,
                number(&row[2])?,
                number(&row[3])?,
                number(&row[4])?,
                number(&row[5])?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CandleSeries::new(candles))
}

/// Klines encode prices as strings; accept plain numbers too.
fn number(value: &Value) -> Result<f64, ExchangeError> {
    let parsed = match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Decode(format!("expected numeric field, got {value}")))
}

fn balances_from(rows: Vec<BalanceResponse>) -> Balances {
    let mut balances = Balances::default();
    for row in rows {
        let used = (row.balance - row.available_balance).max(Decimal::ZERO);
        balances.insert(
            row.asset,
            CurrencyBalance {
                free: row.available_balance,
                used,
                total: row.balance,
            },
        );
    }
    balances
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_signature_matches_reference_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(to_exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(to_exchange_symbol("eth-usdt"), "ETHUSDT");
    }

    #[test]
    fn test_price_and_quantity_formatting() {
        assert_eq!(format_price("BTC/USDT", dec!(66123.4567)), "66123.46");
        assert_eq!(format_price("ETH/USDT", dec!(0.123456789)), "0.12345679");
        assert_eq!(format_price("BTC/USDT", dec!(64000.00)), "64000");
        assert_eq!(format_quantity(dec!(0.03789)), "0.037");
        assert_eq!(format_quantity(dec!(0.0009)), "0");
    }

    #[test]
    fn test_closing_order_is_reduce_only() {
        let entry = OrderRequest::market("BTC/USDT", Side::Buy, dec!(0.01))
            .with_leverage(10)
            .with_exits(dec!(63000), dec!(66000));
        let params = market_order_params(&entry, "BTCUSDT", "0.01", "a1".into());
        assert!(!params.iter().any(|(k, _)| *k == "reduceOnly"));

        let close = OrderRequest::market("BTC/USDT", Side::Sell, dec!(0.01))
            .with_leverage(10)
            .closing();
        let params = market_order_params(&close, "BTCUSDT", "0.01", "b2".into());
        assert!(params.contains(&("reduceOnly", "true".to_string())));
        assert!(params.contains(&("side", "SELL".to_string())));
        assert_eq!(
            encode_params(&params),
            "symbol=BTCUSDT&side=SELL&type=MARKET&quantity=0.01&reduceOnly=true&newClientOrderId=b2&newOrderRespType=RESULT"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ExchangeError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream"),
            ExchangeError::Connectivity(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ExchangeError::Auth(_)
        ));

        let err = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":-4164,"msg":"Order's notional must be no smaller than 100"}"#,
        );
        assert_eq!(
            err,
            ExchangeError::Rejected("Order's notional must be no smaller than 100 (code -4164)".to_string())
        );
    }

    #[test]
    fn test_parse_klines() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            [1700000300000i64, "101.0", "103.0", "100.5", "102.0", "12.5", 1700000599999i64],
            [1700000000000i64, "100.0", "102.0", "99.0", "101.0", "10.0", 1700000299999i64]
        ]))
        .unwrap();

        let series = parse_klines(&rows).unwrap();
        assert_eq!(series.len(), 2);
        // sorted ascending
        assert_eq!(series.closes(), vec![101.0, 102.0]);
        assert_eq!(series.volumes(), vec![10.0, 12.5]);
    }

    #[test]
    fn test_parse_klines_rejects_garbage() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([[1700000000000i64, "x", "1", "1", "1", "1"]])).unwrap();
        assert!(matches!(parse_klines(&rows), Err(ExchangeError::Decode(_))));

        let short: Vec<Vec<Value>> = serde_json::from_value(json!([[1700000000000i64, "1"]])).unwrap();
        assert!(parse_klines(&short).is_err());
    }

    #[test]
    fn test_balances_from_rows() {
        let rows: Vec<BalanceResponse> = serde_json::from_value(json!([
            {"accountAlias": "x", "asset": "USDT", "balance": "1200.50", "availableBalance": "1000.25", "crossWalletBalance": "1200.50"},
            {"asset": "BNB", "balance": "0", "availableBalance": "0"}
        ]))
        .unwrap();
        let balances = balances_from(rows);
        assert_eq!(balances.free("USDT"), dec!(1000.25));
        assert_eq!(balances.total("USDT"), dec!(1200.50));
        assert_eq!(balances.get("USDT").unwrap().used, dec!(200.25));
    }

    #[tokio::test]
    async fn test_signed_request_requires_credentials() {
        let exchange = LiveExchange::new(String::new(), String::new()).unwrap();
        let err = exchange.fetch_balance().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }
}
