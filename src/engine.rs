//! Loop orchestrator: one task that observes the market, decides, trades and
//! records, once per interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::exchange::{ExchangeError, ExchangeGateway, OrderRequest, RetryPolicy, Venue};
use crate::indicators::IndicatorSet;
use crate::models::{Position, TradeRecord};
use crate::notify::{self, Notifier};
use crate::state::SharedState;
use crate::trading::{confidence, Decision, MarketView, PositionMachine, RiskManager};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Held,
    Opened(Position),
    Closed(TradeRecord),
}

/// The trading loop and everything it owns.
pub struct Engine {
    config: Arc<EngineConfig>,
    gateway: Arc<dyn ExchangeGateway>,
    fallback: Option<Arc<dyn ExchangeGateway>>,
    state: SharedState,
    machine: PositionMachine,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(
        config: Arc<EngineConfig>,
        gateway: Arc<dyn ExchangeGateway>,
        state: SharedState,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let machine = PositionMachine::new(
            RiskManager::new(config.risk.clone()),
            config.signal.clone(),
        );
        Self {
            config,
            gateway,
            fallback: None,
            state,
            machine,
            notifier,
            retry: RetryPolicy::default(),
        }
    }

    /// Gateway to switch to when the live venue becomes unreachable.
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn ExchangeGateway>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn venue(&self) -> Venue {
        self.gateway.venue()
    }

    /// Tick until `cancel` fires. A failed tick is logged, notified and
    /// followed by the error back-off instead of the regular interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            symbol = %self.config.symbol,
            timeframe = %self.config.timeframe,
            interval = self.config.loop_interval.as_secs(),
            venue = %self.venue(),
            "Trading loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = match self.tick(Utc::now()).await {
                Ok(outcome) => {
                    debug!(?outcome, "Tick complete");
                    self.config.loop_interval
                }
                Err(e) => self.handle_tick_error(e).await,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Trading loop stopped");
    }

    /// Either switch venue (and retry soon) or report the error and back off.
    async fn handle_tick_error(&mut self, e: anyhow::Error) -> Duration {
        let transient = e
            .downcast_ref::<ExchangeError>()
            .is_some_and(ExchangeError::is_transient);

        if transient && self.switch_to_fallback(&format!("{e:#}")).await {
            return self.config.loop_interval;
        }

        error!(error = %format!("{e:#}"), "Error in trading loop");
        self.notifier
            .send(&notify::error_message(&format!("{e:#}"), Utc::now()))
            .await;
        self.config.error_backoff
    }

    /// Replace the live gateway with the fallback. Returns whether it switched.
    pub async fn switch_to_fallback(&mut self, reason: &str) -> bool {
        if !self.config.synthetic_fallback || self.gateway.venue() != Venue::Live {
            return false;
        }
        let Some(fallback) = self.fallback.take() else {
            return false;
        };

        let from = self.gateway.venue();
        let to = fallback.venue();
        self.gateway = fallback;

        let had_position = self
            .state
            .update(|s| {
                s.venue = to;
                s.has_position()
            })
            .await;
        if had_position {
            warn!("Switching venue with an open position, it will be managed on {to} prices");
        }

        warn!(from = %from, to = %to, reason = %reason, "Exchange unreachable, switched venue");
        self.notifier
            .send(&notify::venue_switched_message(from, to, reason, Utc::now()))
            .await;
        true
    }

    /// One observe, decide, act cycle.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let gateway = self.gateway.clone();
        let symbol = self.config.symbol.as_str();
        let quote = self.config.quote_currency();

        let balances = self
            .retry
            .run("fetch_balance", || gateway.fetch_balance())
            .await
            .context("Failed to fetch balance")?;
        let free = balances.free(quote);
        debug!(
            free = %free,
            equity = %balances.total(quote),
            base_held = %balances.free(self.config.base_currency()),
            "Balance fetched"
        );

        self.state
            .update(|s| {
                s.record_balance(free);
                s.reset_daily_if_due(now);
            })
            .await;

        let candles = self
            .retry
            .run("fetch_ohlcv", || {
                gateway.fetch_ohlcv(symbol, &self.config.timeframe, self.config.candle_limit)
            })
            .await
            .context("Failed to fetch candles")?;

        let Some(close) = candles.latest_close() else {
            warn!(symbol, "No candles returned, skipping cycle");
            return Ok(TickOutcome::Held);
        };
        let Some(price) = Decimal::from_f64(close).map(|d| d.round_dp(8)) else {
            warn!(close, "Latest close is not a usable price, skipping cycle");
            return Ok(TickOutcome::Held);
        };

        let indicators = IndicatorSet::compute(&candles, &self.config.indicators);
        let risk = self.machine.risk();

        let snapshot = self
            .state
            .update(|s| {
                s.last_confidence = Some(confidence::score(&indicators, s.total_pnl));
                s.last_volatility = indicators.volatility;
                s.last_health_check = Some(now);
                s.reduce_risk_advised = risk.should_reduce_risk(s);
                s.clone()
            })
            .await;

        let view = MarketView {
            confidence: snapshot.last_confidence.unwrap_or(confidence::FALLBACK_CONFIDENCE),
            indicators,
            price,
            available_balance: free,
        };
        debug!(
            price = %view.price,
            confidence = view.confidence,
            volatility = ?view.indicators.volatility,
            rsi = ?view.indicators.rsi,
            balance = %free,
            "Market observed"
        );

        let decision = self
            .machine
            .decide(&snapshot, &view, self.config.trading_enabled, now);
        self.apply(decision, &snapshot.position, now).await
    }

    /// Submit the order for `decision` and only then record the transition.
    async fn apply(
        &self,
        decision: Decision,
        open: &Option<Position>,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let symbol = &self.config.symbol;

        match decision {
            Decision::Hold => Ok(TickOutcome::Held),

            Decision::Open(plan) => {
                let request = OrderRequest::market(symbol.clone(), plan.side, plan.quantity())
                    .with_leverage(plan.leverage)
                    .with_exits(plan.stop_loss_price, plan.take_profit_price);
                let order = self
                    .gateway
                    .create_market_order(&request)
                    .await
                    .context("Failed to open position")?;

                let position = plan.into_position(now);
                self.state
                    .update(|s| s.open_position(position.clone()))
                    .await
                    .context("Order filled but position could not be recorded")?;

                info!(
                    order_id = %order.id,
                    side = %position.side,
                    size = %position.size,
                    entry = %position.entry_price,
                    leverage = position.leverage,
                    "Position opened"
                );
                self.notifier
                    .send(&notify::trade_opened_message(symbol, &position))
                    .await;
                Ok(TickOutcome::Opened(position))
            }

            Decision::Close { reason, price } => {
                let position = open
                    .as_ref()
                    .context("Exit decided without an open position")?;
                let request =
                    OrderRequest::market(symbol.clone(), position.side.opposite(), position.quantity())
                        .with_leverage(position.leverage)
                        .closing();
                let order = self
                    .gateway
                    .create_market_order(&request)
                    .await
                    .context("Failed to close position")?;

                let record = self
                    .state
                    .update(|s| s.close_position(price, reason, now))
                    .await
                    .context("Close filled but trade could not be recorded")?;

                info!(
                    order_id = %order.id,
                    reason = %reason,
                    exit = %price,
                    pnl = %record.pnl,
                    "Position closed"
                );
                self.notifier
                    .send(&notify::trade_closed_message(symbol, &record))
                    .await;
                Ok(TickOutcome::Closed(record))
            }
        }
    }
}
