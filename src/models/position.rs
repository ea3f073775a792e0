//! The single open leveraged position.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Open position. At most one exists at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,

    /// Fill price at entry
    pub entry_price: Decimal,

    pub entry_time: DateTime<Utc>,

    /// Quote-currency notional committed
    pub size: Decimal,

    pub leverage: u32,

    pub stop_loss_price: Decimal,

    pub take_profit_price: Decimal,
}

impl Position {
    /// Base-currency quantity actually ordered (`size / entry_price`).
    pub fn quantity(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.size / self.entry_price
    }

    /// Leveraged P&L if the position were closed at `exit_price`.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        let move_per_unit = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };
        move_per_unit * self.quantity() * Decimal::from(self.leverage)
    }

    /// Price has reached the favourable target.
    pub fn take_profit_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price >= self.take_profit_price,
            Side::Sell => price <= self.take_profit_price,
        }
    }

    /// Price has reached the adverse threshold.
    pub fn stop_loss_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_loss_price,
            Side::Sell => price >= self.stop_loss_price,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.entry_time
    }
}
