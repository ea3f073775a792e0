//! Trading state owned by the engine and shared with readers as snapshots.
//!
//! The engine task is the only writer. Everything else (command replies,
//! supervisor status) takes a cloned [`TradingState`] through
//! [`SharedState::snapshot`], so no lock is ever held across an exchange call.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::exchange::Venue;
use crate::models::{ExitReason, Position, TradeRecord};

/// Invariant faults on the position lifecycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("a position is already open")]
    PositionAlreadyOpen,

    #[error("no position is open")]
    NoOpenPosition,
}

/// Aggregate engine state. Lives in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingState {
    pub position: Option<Position>,
    pub total_pnl: Decimal,
    pub daily_trades: u32,

    /// Next instant at which the daily counter resets
    pub daily_reset_at: DateTime<Utc>,

    /// First balance observed after start, `None` until then
    pub initial_balance: Option<Decimal>,
    pub current_balance: Decimal,

    pub last_confidence: Option<f64>,
    pub last_volatility: Option<f64>,
    pub last_health_check: Option<DateTime<Utc>>,

    /// Advisory flag from the risk manager, never consumed by entry logic
    pub reduce_risk_advised: bool,

    /// Venue currently serving the engine
    pub venue: Venue,

    pub trades: Vec<TradeRecord>,
}

impl TradingState {
    pub fn new(now: DateTime<Utc>, venue: Venue) -> Self {
        Self {
            position: None,
            total_pnl: Decimal::ZERO,
            daily_trades: 0,
            daily_reset_at: next_utc_midnight(now),
            initial_balance: None,
            current_balance: Decimal::ZERO,
            last_confidence: None,
            last_volatility: None,
            last_health_check: None,
            reduce_risk_advised: false,
            venue,
            trades: Vec::new(),
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    /// Reset the daily counter if the watermark has passed. Returns whether it reset.
    ///
    /// Checked once per tick, so the reset lands up to one loop interval late.
    pub fn reset_daily_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if !should_reset(now, self.daily_reset_at) {
            return false;
        }
        self.daily_trades = 0;
        self.daily_reset_at = next_utc_midnight(now);
        info!(next_reset = %self.daily_reset_at, "Daily trades counter reset");
        true
    }

    /// Record a balance reading. The first positive one becomes the initial
    /// balance, so an account funded after start-up still gets a drawdown base.
    pub fn record_balance(&mut self, balance: Decimal) {
        if self.initial_balance.map_or(true, |b| b <= Decimal::ZERO) {
            self.initial_balance = Some(balance);
        }
        self.current_balance = balance;
    }

    /// Store a freshly opened position and count it against the daily limit.
    pub fn open_position(&mut self, position: Position) -> Result<(), StateError> {
        if self.position.is_some() {
            return Err(StateError::PositionAlreadyOpen);
        }
        self.position = Some(position);
        self.daily_trades += 1;
        Ok(())
    }

    /// Realize P&L at `exit_price`, append the trade record and go flat.
    pub fn close_position(
        &mut self,
        exit_price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord, StateError> {
        let position = self.position.take().ok_or(StateError::NoOpenPosition)?;
        let pnl = position.pnl_at(exit_price);

        let record = TradeRecord {
            time: now,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            leverage: position.leverage,
            pnl,
            exit_reason: reason,
        };
        self.total_pnl += pnl;
        self.trades.push(record.clone());

        info!(pnl = %pnl, total_pnl = %self.total_pnl, reason = %reason, "Trade closed");
        Ok(record)
    }

    /// Most recent `n` trades, oldest first.
    pub fn recent_trades(&self, n: usize) -> &[TradeRecord] {
        let start = self.trades.len().saturating_sub(n);
        &self.trades[start..]
    }

    pub fn winning_trades(&self) -> usize {
        self.trades.iter().filter(|t| t.pnl > Decimal::ZERO).count()
    }
}

/// Whether the daily reset watermark has been reached.
pub fn should_reset(now: DateTime<Utc>, watermark: DateTime<Utc>) -> bool {
    now >= watermark
}

/// The first UTC midnight strictly after `now`.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Single-writer handle to the [`TradingState`].
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<TradingState>>,
}

impl SharedState {
    pub fn new(state: TradingState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the current state. Never a live reference.
    pub async fn snapshot(&self) -> TradingState {
        self.inner.read().await.clone()
    }

    /// Apply a mutation under the write lock.
    pub async fn update<R>(&self, f: impl FnOnce(&mut TradingState) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}
