//! Trade side and the immutable record appended when a position closes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order or position. `Buy` opens a long, `Sell` a short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Side of the order that closes a position opened with `self`.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Position direction label used in messages.
    pub fn position_label(&self) -> &'static str {
        match self {
            Side::Buy => "LONG",
            Side::Sell => "SHORT",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an open position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take profit",
            ExitReason::StopLoss => "stop loss",
            ExitReason::TimeExit => "time exit",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed trade. Never mutated after it is appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// When the position was closed
    pub time: DateTime<Utc>,

    pub side: Side,

    pub entry_price: Decimal,

    pub exit_price: Decimal,

    /// Quote-currency notional committed at entry
    pub size: Decimal,

    pub leverage: u32,

    /// Realized P&L in quote currency
    pub pnl: Decimal,

    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn is_loss(&self) -> bool {
        self.pnl < Decimal::ZERO
    }

    /// Return on the committed notional, in percent.
    pub fn roi_pct(&self) -> Decimal {
        if self.size.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl / self.size * Decimal::ONE_HUNDRED
    }
}
