//! Deterministic simulated venue: a bounded mean-reverting random walk.
//!
//! The walk is seeded, so two instances with the same seed produce the same
//! price path. Every `fetch_ohlcv` call advances the market by one bar.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    split_symbol, Balances, CurrencyBalance, ExchangeError, ExchangeGateway, Order, OrderRequest,
    Ticker, Venue,
};
use crate::models::{parse_timeframe, Candle, CandleSeries, Side};

/// Bars kept in memory regardless of the requested window.
const MAX_HISTORY: usize = 1000;

/// Parameters of the simulated market.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    /// Price the walk reverts to
    pub anchor_price: f64,

    /// Maximum relative step per bar
    pub volatility: f64,

    /// Weight of the anchor in each reversion step
    pub reversion: f64,

    pub initial_balance: Decimal,

    /// Fee charged on every fill (fraction of notional)
    pub fee_rate: Decimal,

    pub quote_currency: String,
    pub base_currency: String,

    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            anchor_price: 66_000.0,
            volatility: 0.008,
            reversion: 0.002,
            initial_balance: dec!(10000),
            fee_rate: dec!(0.001),
            quote_currency: "USDT".to_string(),
            base_currency: "BTC".to_string(),
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Default market for `symbol`, e.g. `ETH/USDT`.
    pub fn for_symbol(symbol: &str, seed: u64) -> Self {
        let mut config = Self {
            seed,
            ..Self::default()
        };
        if let Some((base, quote)) = split_symbol(symbol) {
            config.base_currency = base.to_string();
            config.quote_currency = quote.to_string();
        }
        config
    }
}

struct Market {
    rng: StdRng,
    price: f64,
    history: Vec<Candle>,
    balance: Decimal,
    next_order_id: u64,
}

/// Simulated exchange. Always connected.
pub struct SyntheticExchange {
    config: SyntheticConfig,
    market: Mutex<Market>,
}

impl SyntheticExchange {
    pub fn new(config: SyntheticConfig) -> Self {
        info!(seed = config.seed, anchor = config.anchor_price, "Synthetic market initialised");
        let market = Market {
            rng: StdRng::seed_from_u64(config.seed),
            price: config.anchor_price,
            history: Vec::new(),
            balance: config.initial_balance,
            next_order_id: 10_000,
        };
        Self {
            config,
            market: Mutex::new(market),
        }
    }

    /// Advance the walk by one step and return the new price, rounded to cents.
    fn step(&self, market: &mut Market) -> f64 {
        let anchor = self.config.anchor_price;
        let u: f64 = market.rng.gen();
        let mut price = market.price + (u - 0.5) * 2.0 * self.config.volatility * market.price;
        price = price * (1.0 - self.config.reversion) + anchor * self.config.reversion;
        price = price.clamp(anchor * 0.5, anchor * 1.5);
        market.price = (price * 100.0).round() / 100.0;
        market.price
    }

    fn next_bar(&self, market: &mut Market, timestamp: DateTime<Utc>) -> Candle {
        let open = market.price;
        let close = self.step(market);
        let wick_up: f64 = market.rng.gen_range(0.0..0.002);
        let wick_down: f64 = market.rng.gen_range(0.0..0.002);
        let volume: f64 = market.rng.gen_range(50.0..150.0);
        Candle::new(
            timestamp,
            open,
            open.max(close) * (1.0 + wick_up),
            open.min(close) * (1.0 - wick_down),
            close,
            volume,
        )
    }

    fn to_decimal(value: f64) -> Result<Decimal, ExchangeError> {
        Decimal::from_f64(value)
            .map(|d| d.round_dp(2))
            .ok_or_else(|| ExchangeError::Decode(format!("price {value} not representable")))
    }
}

#[async_trait]
impl ExchangeGateway for SyntheticExchange {
    fn venue(&self) -> Venue {
        Venue::Synthetic
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let market = self.market.lock().await;
        let last = Self::to_decimal(market.price)?;
        let (high, low, volume) = match market.history.last() {
            Some(bar) => (
                Some(Self::to_decimal(bar.high)?),
                Some(Self::to_decimal(bar.low)?),
                Decimal::from_f64(bar.volume),
            ),
            None => (None, None, None),
        };
        debug!(symbol, price = %last, "Synthetic ticker");
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            high,
            low,
            volume,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<CandleSeries, ExchangeError> {
        let bar = parse_timeframe(timeframe)
            .ok_or_else(|| ExchangeError::Rejected(format!("unsupported timeframe '{timeframe}'")))?;

        let mut market = self.market.lock().await;

        if market.history.is_empty() {
            // Backfill so the first window is full
            let now = Utc::now();
            let start = now - bar * i32::try_from(limit).unwrap_or(i32::MAX);
            for i in 0..limit {
                let ts = start + bar * i32::try_from(i).unwrap_or(i32::MAX);
                let candle = self.next_bar(&mut market, ts);
                market.history.push(candle);
            }
        }

        let next_ts = market
            .history
            .last()
            .map(|c| c.timestamp + bar)
            .unwrap_or_else(Utc::now);
        let candle = self.next_bar(&mut market, next_ts);
        market.history.push(candle);

        if market.history.len() > MAX_HISTORY {
            let excess = market.history.len() - MAX_HISTORY;
            market.history.drain(..excess);
        }

        debug!(symbol, bars = limit, close = market.price, "Synthetic candles");
        Ok(CandleSeries::new(market.history.clone()).window(limit))
    }

    async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let market = self.market.lock().await;
        let mut balances = Balances::default();
        balances.insert(
            self.config.quote_currency.clone(),
            CurrencyBalance {
                free: market.balance,
                used: Decimal::ZERO,
                total: market.balance,
            },
        );
        balances.insert(self.config.base_currency.clone(), CurrencyBalance::default());
        Ok(balances)
    }

    async fn create_market_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        if request.amount <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "order amount must be positive, got {}",
                request.amount
            )));
        }

        let mut market = self.market.lock().await;
        let price = Self::to_decimal(market.price)?;
        let notional = request.amount * price;
        let fee = notional * self.config.fee_rate;

        match request.side {
            Side::Buy => market.balance -= notional + fee,
            Side::Sell => market.balance += notional - fee,
        }

        let id = market.next_order_id.to_string();
        market.next_order_id += 1;

        info!(
            id = %id,
            side = %request.side,
            amount = %request.amount,
            price = %price,
            leverage = request.leverage,
            stop_loss = ?request.stop_loss,
            take_profit = ?request.take_profit,
            reduce_only = request.reduce_only,
            "Synthetic market order filled"
        );

        Ok(Order {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            price: Some(price),
            fee,
            status: "closed".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(seed: u64) -> SyntheticExchange {
        SyntheticExchange::new(SyntheticConfig {
            seed,
            ..SyntheticConfig::default()
        })
    }

    #[tokio::test]
    async fn test_same_seed_same_path() {
        let a = exchange(7);
        let b = exchange(7);
        let ca = a.fetch_ohlcv("BTC/USDT", "5m", 100).await.unwrap();
        let cb = b.fetch_ohlcv("BTC/USDT", "5m", 100).await.unwrap();
        assert_eq!(ca.closes(), cb.closes());

        let c = exchange(8);
        let cc = c.fetch_ohlcv("BTC/USDT", "5m", 100).await.unwrap();
        assert_ne!(ca.closes(), cc.closes());
    }

    #[tokio::test]
    async fn test_window_and_advance() {
        let ex = exchange(1);
        let first = ex.fetch_ohlcv("BTC/USDT", "5m", 100).await.unwrap();
        assert_eq!(first.len(), 100);

        let second = ex.fetch_ohlcv("BTC/USDT", "5m", 100).await.unwrap();
        assert_eq!(second.len(), 100);
        let gap = second.last().unwrap().timestamp - first.last().unwrap().timestamp;
        assert_eq!(gap, Duration::minutes(5));
        // shifted by exactly one bar
        assert_eq!(&first.closes()[1..], &second.closes()[..99]);
    }

    #[tokio::test]
    async fn test_walk_stays_bounded() {
        let ex = exchange(99);
        let series = ex.fetch_ohlcv("BTC/USDT", "1m", 1000).await.unwrap();
        for close in series.closes() {
            assert!((33_000.0..=99_000.0).contains(&close));
            assert_eq!((close * 100.0).round() / 100.0, close);
        }
    }

    #[tokio::test]
    async fn test_bad_timeframe_rejected() {
        let ex = exchange(1);
        let err = ex.fetch_ohlcv("BTC/USDT", "5x", 10).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_orders_move_balance_with_fee() {
        let ex = exchange(3);
        ex.fetch_ohlcv("BTC/USDT", "5m", 10).await.unwrap();

        let buy = ex
            .create_market_order(&OrderRequest::market("BTC/USDT", Side::Buy, dec!(0.01)))
            .await
            .unwrap();
        let price = buy.price.unwrap();
        let notional = dec!(0.01) * price;
        assert_eq!(buy.fee, notional * dec!(0.001));

        let balance = ex.fetch_balance().await.unwrap();
        assert_eq!(balance.free("USDT"), dec!(10000) - notional - buy.fee);

        let sell = ex
            .create_market_order(&OrderRequest::market("BTC/USDT", Side::Sell, dec!(0.01)))
            .await
            .unwrap();
        assert_eq!(sell.price, Some(price));
        let balance = ex.fetch_balance().await.unwrap();
        assert_eq!(balance.free("USDT"), dec!(10000) - buy.fee - sell.fee);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ex = exchange(3);
        let err = ex
            .create_market_order(&OrderRequest::market("BTC/USDT", Side::Buy, Decimal::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_always_connected() {
        let ex = exchange(3);
        assert!(ex.is_connected().await);
        assert_eq!(ex.venue(), Venue::Synthetic);
        let ticker = ex.fetch_ticker("BTC/USDT").await.unwrap();
        assert_eq!(ticker.last, dec!(66000));
    }

    #[test]
    fn test_config_for_symbol() {
        let config = SyntheticConfig::for_symbol("ETH/USDC", 5);
        assert_eq!(config.base_currency, "ETH");
        assert_eq!(config.quote_currency, "USDC");
        assert_eq!(config.seed, 5);
    }
}
