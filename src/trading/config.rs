//! Risk and signal configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for position sizing, leverage and exits.
///
/// Percentages are stored as fractions (0.0 to 1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of available balance committed per position
    pub position_size_pct: Decimal,

    /// Leverage used at confidence 0.0
    pub min_leverage: u32,

    /// Leverage used at confidence 1.0
    pub max_leverage: u32,

    /// Fixed stop-loss distance from entry
    pub stop_loss_pct: Decimal,

    /// Take-profit distance at zero volatility
    pub min_take_profit_pct: Decimal,

    /// Take-profit distance once volatility reaches 2.0
    pub max_take_profit_pct: Decimal,

    /// Loss-only drawdown (relative to initial balance) that blocks new entries
    pub max_drawdown_pct: Decimal,

    /// Entries allowed per UTC day
    pub max_daily_trades: u32,

    /// Positions older than this are closed regardless of price
    pub max_position_age_hours: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            position_size_pct: dec!(0.25),   // 25% of free balance
            min_leverage: 5,
            max_leverage: 20,
            stop_loss_pct: dec!(0.03),       // 3% adverse move
            min_take_profit_pct: dec!(0.06), // 6% in calm markets
            max_take_profit_pct: dec!(0.08), // 8% in volatile markets
            max_drawdown_pct: dec!(0.15),    // Stop opening at 15% DD
            max_daily_trades: 5,
            max_position_age_hours: 24,
        }
    }
}

/// Thresholds for the long/short entry rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,

    /// Longs require RSI below this ceiling
    pub long_rsi_ceiling: f64,

    /// Shorts require RSI above this floor
    pub short_rsi_floor: f64,

    /// Minimum volume profile for any entry
    pub volume_threshold: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            long_rsi_ceiling: 60.0,
            short_rsi_floor: 40.0,
            volume_threshold: 1.5,
        }
    }
}
