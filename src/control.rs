//! In-process control surface: start, stop and inspect the engine.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Credentials, EngineConfig};
use crate::engine::Engine;
use crate::exchange::{
    ExchangeGateway, LiveExchange, RetryPolicy, SyntheticConfig, SyntheticExchange, Venue,
};
use crate::indicators::IndicatorSet;
use crate::models::{Side, TradeRecord};
use crate::notify::{self, CommandPoller, LogNotifier, Notifier, TelegramClient};
use crate::state::{SharedState, TradingState};
use crate::trading::{confidence, signal, EntryPlan, RiskManager};

/// Snapshot of the supervisor and, when running, the engine state.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub running: bool,
    pub trading_enabled: bool,
    pub notifications_enabled: bool,
    pub state: Option<TradingState>,
}

impl StatusReport {
    /// Active venue, `None` while stopped.
    pub fn venue(&self) -> Option<Venue> {
        self.state.as_ref().map(|s| s.venue)
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(state) = &self.state else {
            return write!(f, "Engine: stopped");
        };

        write!(
            f,
            "Engine: {} | venue: {} | trading: {} | balance: {:.2} | pnl: {:.4} | trades today: {} | confidence: {}",
            if self.running { "running" } else { "stopped" },
            state.venue,
            if self.trading_enabled { "on" } else { "off" },
            state.current_balance,
            state.total_pnl,
            state.daily_trades,
            state
                .last_confidence
                .map(|c| format!("{c:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
        )?;
        match &state.position {
            Some(p) => write!(
                f,
                " | {} {:.2} @ {:.2} ({}x, SL {:.2}, TP {:.2})",
                p.side.position_label(),
                p.size,
                p.entry_price,
                p.leverage,
                p.stop_loss_price,
                p.take_profit_price
            ),
            None => write!(f, " | flat"),
        }
    }
}

/// Liveness of the process itself, independent of engine health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub ok: bool,
    pub timestamp: DateTime<Utc>,
}

/// One read-only evaluation of the market.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub symbol: String,
    pub venue: Venue,
    pub balance: Decimal,
    pub indicators: IndicatorSet,
    pub confidence: f64,
    pub signal: Option<Side>,
    pub plan: Option<EntryPlan>,
}

impl std::fmt::Display for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let opt = |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".into());
        let ind = &self.indicators;

        writeln!(f, "=== Analysis: {} ({}) ===\n", self.symbol, self.venue)?;
        writeln!(f, "Close:          {}", opt(ind.close))?;
        writeln!(f, "RSI:            {}", opt(ind.rsi))?;
        writeln!(
            f,
            "EMA s/m/l:      {} / {} / {}",
            opt(ind.ema_short),
            opt(ind.ema_medium),
            opt(ind.ema_long)
        )?;
        writeln!(f, "MACD / signal:  {} / {}", opt(ind.macd), opt(ind.macd_signal))?;
        writeln!(
            f,
            "Bollinger:      {} / {} / {}",
            opt(ind.bb_lower),
            opt(ind.bb_mid),
            opt(ind.bb_upper)
        )?;
        writeln!(f, "Volatility:     {}%", opt(ind.volatility))?;
        writeln!(f, "Volume profile: {:.2}", ind.volume_profile)?;
        writeln!(f, "Confidence:     {:.2}", self.confidence)?;
        writeln!(f, "Balance:        {:.2}", self.balance)?;

        match (&self.signal, &self.plan) {
            (Some(side), Some(plan)) => write!(
                f,
                "\nSignal: {} {}\n  Size:        {:.2}\n  Leverage:    {}x\n  Stop loss:   {:.2}\n  Take profit: {:.2}",
                side.position_label(),
                side,
                plan.size,
                plan.leverage,
                plan.stop_loss_price,
                plan.take_profit_price
            ),
            _ => write!(f, "\nSignal: none"),
        }
    }
}

struct Running {
    state: SharedState,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    notifier: Arc<dyn Notifier>,
}

/// Owns the engine lifecycle. At most one engine runs at a time.
pub struct Supervisor {
    config: Arc<EngineConfig>,
    credentials: Credentials,
    retry: RetryPolicy,
    running: Option<Running>,
}

impl Supervisor {
    pub fn new(config: EngineConfig, credentials: Credentials) -> Self {
        Self {
            config: Arc::new(config),
            credentials,
            retry: RetryPolicy::default(),
            running: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Validate, connect, record the initial balance and spawn the tasks.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            anyhow::bail!("Engine is already running");
        }
        self.credentials.require(&self.config)?;

        let telegram = self.telegram()?;
        let notifier: Arc<dyn Notifier> = match &telegram {
            Some(client) => client.clone() as Arc<dyn Notifier>,
            None => Arc::new(LogNotifier),
        };

        let gateway = self.connect(notifier.as_ref()).await?;
        let venue = gateway.venue();

        let balances = match self
            .retry
            .run("fetch_balance", || gateway.fetch_balance())
            .await
        {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "Failed to fetch initial balance");
                notifier
                    .send(&notify::error_message(
                        &format!("Failed to fetch initial balance: {e}"),
                        Utc::now(),
                    ))
                    .await;
                return Err(e).context("Failed to fetch initial balance");
            }
        };

        let mut initial = TradingState::new(Utc::now(), venue);
        initial.record_balance(balances.free(self.config.quote_currency()));
        info!(
            balance = %initial.current_balance,
            venue = %venue,
            "Initial balance recorded"
        );
        let state = SharedState::new(initial);

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let engine = Engine::new(self.config.clone(), gateway, state.clone(), notifier.clone())
            .with_fallback(self.fallback_for(venue))
            .with_retry(self.retry);
        tasks.push(("engine", tokio::spawn(engine.run(cancel.clone()))));

        if let Some(client) = telegram {
            let poller = CommandPoller::new(client, state.clone(), self.config.clone());
            tasks.push(("commands", tokio::spawn(poller.run(cancel.clone()))));
        }

        notifier.send(&notify::started_message()).await;
        info!(symbol = %self.config.symbol, venue = %venue, "Engine started");

        self.running = Some(Running {
            state,
            cancel,
            tasks,
            notifier,
        });
        Ok(())
    }

    /// Cancel the tasks and wait for them, aborting any that overrun the
    /// shutdown timeout.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            anyhow::bail!("Engine is not running");
        };

        info!("Stopping engine");
        running.cancel.cancel();

        let timeout = self.config.shutdown_timeout;
        futures::future::join_all(running.tasks.into_iter().map(|(name, mut handle)| async move {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }))
        .await;

        running.notifier.send(&notify::stopped_message()).await;
        Ok(())
    }

    pub async fn status(&self) -> StatusReport {
        let (state, notifications_enabled) = match &self.running {
            Some(r) => (Some(r.state.snapshot().await), r.notifier.is_enabled()),
            None => (None, false),
        };
        StatusReport {
            running: self.running.is_some(),
            trading_enabled: self.config.trading_enabled,
            notifications_enabled,
            state,
        }
    }

    /// Closed trades so far, oldest first. Empty while stopped.
    pub async fn trades(&self) -> Vec<TradeRecord> {
        match &self.running {
            Some(r) => r.state.snapshot().await.trades,
            None => Vec::new(),
        }
    }

    pub fn ping(&self) -> Ping {
        Ping {
            ok: true,
            timestamp: Utc::now(),
        }
    }

    /// Evaluate the market once without trading or touching engine state.
    pub async fn analyze(&self) -> Result<Analysis> {
        let missing: Vec<String> = self
            .credentials
            .missing(&self.config)
            .into_iter()
            .filter(|name| name.starts_with("API_"))
            .collect();
        if !missing.is_empty() {
            return Err(crate::config::ConfigError::MissingCredentials(missing).into());
        }

        let gateway = self.connect(&LogNotifier).await?;
        let venue = gateway.venue();
        let symbol = self.config.symbol.as_str();

        let balances = self
            .retry
            .run("fetch_balance", || gateway.fetch_balance())
            .await
            .context("Failed to fetch balance")?;
        let candles = self
            .retry
            .run("fetch_ohlcv", || {
                gateway.fetch_ohlcv(symbol, &self.config.timeframe, self.config.candle_limit)
            })
            .await
            .context("Failed to fetch candles")?;

        let balance = balances.free(self.config.quote_currency());
        let mut state = TradingState::new(Utc::now(), venue);
        state.record_balance(balance);

        let indicators = IndicatorSet::compute(&candles, &self.config.indicators);
        let confidence = confidence::score(&indicators, Decimal::ZERO);
        let signal = signal::evaluate(&indicators, &self.config.signal);

        let price = candles
            .latest_close()
            .and_then(Decimal::from_f64)
            .map(|d| d.round_dp(8));
        let plan = match (signal, price) {
            (Some(side), Some(price)) if price > Decimal::ZERO => {
                let risk = RiskManager::new(self.config.risk.clone());
                Some(risk.plan_entry(side, price, balance, confidence, indicators.volatility, &state))
            }
            _ => None,
        };

        Ok(Analysis {
            symbol: symbol.to_string(),
            venue,
            balance,
            indicators,
            confidence,
            signal,
            plan,
        })
    }

    fn telegram(&self) -> Result<Option<Arc<TelegramClient>>> {
        if !self.config.notifications_enabled {
            return Ok(None);
        }
        let (Some(token), Some(chat_id)) = (
            self.credentials.telegram_token.as_deref(),
            self.credentials.telegram_chat_id.as_deref(),
        ) else {
            return Ok(None);
        };
        Ok(Some(Arc::new(TelegramClient::new(token, chat_id)?)))
    }

    fn synthetic(&self) -> Arc<dyn ExchangeGateway> {
        Arc::new(SyntheticExchange::new(SyntheticConfig::for_symbol(
            &self.config.symbol,
            self.config.synthetic_seed,
        )))
    }

    fn fallback_for(&self, venue: Venue) -> Option<Arc<dyn ExchangeGateway>> {
        (venue == Venue::Live && self.config.synthetic_fallback).then(|| self.synthetic())
    }

    /// Gateway for the configured venue. An unreachable live venue falls back
    /// to the synthetic one when allowed, otherwise start-up is refused.
    async fn connect(&self, notifier: &dyn Notifier) -> Result<Arc<dyn ExchangeGateway>> {
        if self.config.exchange_mode == Venue::Synthetic {
            return Ok(self.synthetic());
        }

        let live = LiveExchange::new(
            self.credentials.api_key.clone().unwrap_or_default(),
            self.credentials.api_secret.clone().unwrap_or_default(),
        )?;
        if live.is_connected().await {
            return Ok(Arc::new(live));
        }

        if self.config.synthetic_fallback {
            warn!("Live exchange unreachable, using synthetic market");
            notifier
                .send(&notify::venue_switched_message(
                    Venue::Live,
                    Venue::Synthetic,
                    "live exchange unreachable at start-up",
                    Utc::now(),
                ))
                .await;
            return Ok(self.synthetic());
        }

        error!("Live exchange unreachable");
        notifier
            .send(&notify::error_message(
                "Failed to connect to exchange. Bot not started.",
                Utc::now(),
            ))
            .await;
        anyhow::bail!("Failed to connect to exchange")
    }
}
