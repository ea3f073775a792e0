//! Risk manager: position sizing, leverage, stop-loss / take-profit pricing
//! and trade gating.
//!
//! All outputs are deterministic functions of the config and the inputs.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::RiskConfig;
use crate::models::Side;
use crate::state::TradingState;

/// Take-profit volatility input when volatility is undefined.
const DEFAULT_TP_VOLATILITY: f64 = 0.5;

/// Result of the can-open gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryValidation {
    pub allowed: bool,
    pub reason: String,
}

impl EntryValidation {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: "Entry conditions met".to_string(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Everything needed to submit an entry order and record the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub side: Side,
    pub entry_price: Decimal,
    /// Quote-currency notional
    pub size: Decimal,
    pub leverage: u32,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
}

impl EntryPlan {
    /// Base-currency quantity to order.
    pub fn quantity(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.size / self.entry_price
    }
}

/// Loss-only drawdown relative to the initial balance (0 when in profit or unknown).
pub fn drawdown(total_pnl: Decimal, initial_balance: Option<Decimal>) -> Decimal {
    match initial_balance {
        Some(initial) if initial > Decimal::ZERO && total_pnl < Decimal::ZERO => {
            -total_pnl / initial
        }
        _ => Decimal::ZERO,
    }
}

/// Sizing, leverage and gating rules.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Quote-currency notional for a new position. Never exceeds `available_balance`.
    pub fn position_size(&self, available_balance: Decimal, state: &TradingState) -> Decimal {
        if available_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut fraction = self.config.position_size_pct;

        // Shrink while losing, but never below half
        if state.total_pnl < Decimal::ZERO && !self.config.max_drawdown_pct.is_zero() {
            let dd = drawdown(state.total_pnl, state.initial_balance);
            let drawdown_factor = (Decimal::ONE - dd / self.config.max_drawdown_pct).max(dec!(0.5));
            fraction *= drawdown_factor;
        }

        // Shrink as the daily budget is used up
        if self.config.max_daily_trades > 0 {
            let used = Decimal::from(state.daily_trades) / Decimal::from(self.config.max_daily_trades);
            let trade_factor = (Decimal::ONE - used * dec!(0.5)).max(Decimal::ZERO);
            fraction *= trade_factor;
        }

        let fraction = fraction.clamp(Decimal::ZERO, Decimal::ONE);
        let size = available_balance * fraction;

        info!(size = %size, balance = %available_balance, fraction = %fraction, "Calculated position size");
        size
    }

    /// Map confidence linearly onto the leverage bounds.
    pub fn leverage(&self, confidence: f64) -> u32 {
        let (min, max) = (self.config.min_leverage, self.config.max_leverage);
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let raw = min as f64 + confidence * (max as f64 - min as f64);
        let leverage = (raw.round() as u32).clamp(min, max);

        info!(leverage, confidence, "Using leverage");
        leverage
    }

    /// Take-profit price, wider as volatility rises.
    pub fn take_profit(&self, entry_price: Decimal, side: Side, volatility: Option<f64>) -> Decimal {
        let volatility = volatility
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_TP_VOLATILITY);
        let factor = (volatility / 2.0).clamp(0.0, 1.0);
        let factor = Decimal::try_from(factor).unwrap_or(Decimal::ZERO);

        let pct = self.config.min_take_profit_pct
            + factor * (self.config.max_take_profit_pct - self.config.min_take_profit_pct);

        let price = match side {
            Side::Buy => entry_price * (Decimal::ONE + pct),
            Side::Sell => entry_price * (Decimal::ONE - pct),
        };
        info!(price = %price, pct = %(pct * Decimal::ONE_HUNDRED), "Take profit calculated");
        price
    }

    /// Stop-loss price at the configured fixed distance.
    pub fn stop_loss(&self, entry_price: Decimal, side: Side) -> Decimal {
        let pct = self.config.stop_loss_pct;
        let price = match side {
            Side::Buy => entry_price * (Decimal::ONE - pct),
            Side::Sell => entry_price * (Decimal::ONE + pct),
        };
        info!(price = %price, pct = %(pct * Decimal::ONE_HUNDRED), "Stop loss calculated");
        price
    }

    /// Gate for new entries.
    pub fn can_open_position(&self, state: &TradingState) -> EntryValidation {
        if state.has_position() {
            return EntryValidation::deny("Position already active");
        }

        if state.daily_trades >= self.config.max_daily_trades {
            return EntryValidation::deny(format!(
                "Reached max daily trades: {} >= {}",
                state.daily_trades, self.config.max_daily_trades
            ));
        }

        let dd = drawdown(state.total_pnl, state.initial_balance);
        if dd >= self.config.max_drawdown_pct {
            return EntryValidation::deny(format!(
                "Max drawdown reached: {}% >= {}%",
                (dd * Decimal::ONE_HUNDRED).round_dp(2),
                self.config.max_drawdown_pct * Decimal::ONE_HUNDRED
            ));
        }

        EntryValidation::allow()
    }

    /// Advisory: recent losses or drawdown approaching the limit.
    pub fn should_reduce_risk(&self, state: &TradingState) -> bool {
        if state.trades.len() >= 3 {
            let losses = state.recent_trades(3).iter().filter(|t| t.is_loss()).count();
            if losses >= 2 {
                debug!(losses, "Risk reduction advised after recent losses");
                return true;
            }
        }

        let dd = drawdown(state.total_pnl, state.initial_balance);
        if dd > self.config.max_drawdown_pct * dec!(0.7) {
            debug!(
                drawdown = dd.to_f64().unwrap_or_default(),
                "Risk reduction advised, drawdown approaching limit"
            );
            return true;
        }

        false
    }

    /// Full sizing for an entry at `entry_price`.
    pub fn plan_entry(
        &self,
        side: Side,
        entry_price: Decimal,
        available_balance: Decimal,
        confidence: f64,
        volatility: Option<f64>,
        state: &TradingState,
    ) -> EntryPlan {
        EntryPlan {
            side,
            entry_price,
            size: self.position_size(available_balance, state),
            leverage: self.leverage(confidence),
            stop_loss_price: self.stop_loss(entry_price, side),
            take_profit_price: self.take_profit(entry_price, side, volatility),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Venue;
    use crate::models::{ExitReason, TradeRecord};
    use chrono::Utc;
    use proptest::prelude::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig::default())
    }

    fn state() -> TradingState {
        TradingState::new(Utc::now(), Venue::Synthetic)
    }

    fn closed(pnl: Decimal) -> TradeRecord {
        TradeRecord {
            time: Utc::now(),
            side: Side::Buy,
            entry_price: dec!(100),
            exit_price: dec!(100),
            size: dec!(100),
            leverage: 5,
            pnl,
            exit_reason: ExitReason::TimeExit,
        }
    }

    #[test]
    fn test_base_position_size() {
        let state = state();
        assert_eq!(manager().position_size(dec!(10000), &state), dec!(2500));
    }

    #[test]
    fn test_size_scaled_by_drawdown_and_trades() {
        let mut state = state();
        state.initial_balance = Some(dec!(10000));
        state.total_pnl = dec!(-500); // 5% DD -> factor 1 - 5/15
        let size = manager().position_size(dec!(10000), &state);
        assert_eq!(size.round_dp(6), (dec!(2500) * (Decimal::ONE - dec!(0.05) / dec!(0.15))).round_dp(6));

        // deep drawdown floors at half
        state.total_pnl = dec!(-5000);
        assert_eq!(manager().position_size(dec!(10000), &state), dec!(1250));

        let mut busy = self::state();
        busy.daily_trades = 2; // 1 - 2/5 * 0.5 = 0.8
        assert_eq!(manager().position_size(dec!(10000), &busy), dec!(2000));
    }

    #[test]
    fn test_size_zero_for_empty_balance() {
        assert_eq!(manager().position_size(Decimal::ZERO, &state()), Decimal::ZERO);
        assert_eq!(manager().position_size(dec!(-5), &state()), Decimal::ZERO);
    }

    #[test]
    fn test_leverage_bounds() {
        let m = manager();
        assert_eq!(m.leverage(1.0), 20);
        assert_eq!(m.leverage(0.0), 5);
        // 5 + 0.5 * 15 = 12.5 rounds away from zero
        assert_eq!(m.leverage(0.5), 13);
        assert_eq!(m.leverage(0.85), 18);
        assert_eq!(m.leverage(f64::NAN), 5);
    }

    #[test]
    fn test_take_profit_scales_with_volatility() {
        let m = manager();
        assert_eq!(m.take_profit(dec!(100), Side::Buy, Some(0.0)), dec!(106));
        assert_eq!(m.take_profit(dec!(100), Side::Buy, Some(4.0)), dec!(108));
        assert_eq!(m.take_profit(dec!(100), Side::Sell, Some(2.0)), dec!(92));
        // undefined volatility uses 0.5 -> 6.5%
        assert_eq!(m.take_profit(dec!(100), Side::Buy, None), dec!(106.5));
    }

    #[test]
    fn test_stop_loss_is_directional() {
        let m = manager();
        assert_eq!(m.stop_loss(dec!(100), Side::Buy), dec!(97));
        assert_eq!(m.stop_loss(dec!(100), Side::Sell), dec!(103));
    }

    #[test]
    fn test_gate_blocks_on_drawdown() {
        let mut state = state();
        state.initial_balance = Some(dec!(10000));
        state.total_pnl = dec!(-1600);
        let gate = manager().can_open_position(&state);
        assert!(!gate.allowed);
        assert!(gate.reason.contains("drawdown"));

        state.total_pnl = dec!(-1400);
        assert!(manager().can_open_position(&state).allowed);
    }

    #[test]
    fn test_gate_blocks_on_daily_limit() {
        let mut state = state();
        state.daily_trades = 5;
        assert!(!manager().can_open_position(&state).allowed);
    }

    #[test]
    fn test_gate_blocks_with_open_position() {
        let mut state = state();
        state.position = Some(crate::models::Position {
            side: Side::Buy,
            entry_price: dec!(100),
            entry_time: Utc::now(),
            size: dec!(10),
            leverage: 5,
            stop_loss_price: dec!(97),
            take_profit_price: dec!(106),
        });
        assert!(!manager().can_open_position(&state).allowed);
    }

    #[test]
    fn test_should_reduce_risk() {
        let m = manager();
        let mut state = state();
        assert!(!m.should_reduce_risk(&state));

        state.trades = vec![closed(dec!(-1)), closed(dec!(5)), closed(dec!(-2))];
        assert!(m.should_reduce_risk(&state));

        state.trades = vec![closed(dec!(-1)), closed(dec!(-1)), closed(dec!(5)), closed(dec!(5))];
        assert!(!m.should_reduce_risk(&state));

        // 11% > 0.7 * 15%
        state.initial_balance = Some(dec!(1000));
        state.total_pnl = dec!(-110);
        assert!(m.should_reduce_risk(&state));
    }

    proptest! {
        #[test]
        fn prop_leverage_within_bounds(confidence in -1.0f64..2.0) {
            let lev = manager().leverage(confidence);
            prop_assert!((5..=20).contains(&lev));
        }

        #[test]
        fn prop_size_never_exceeds_balance(
            balance in 0u64..1_000_000,
            pnl in -1_000_000i64..1_000_000,
            trades in 0u32..10,
        ) {
            let mut state = state();
            state.initial_balance = Some(dec!(10000));
            state.total_pnl = Decimal::from(pnl);
            state.daily_trades = trades;
            let balance = Decimal::from(balance);
            let size = manager().position_size(balance, &state);
            prop_assert!(size >= Decimal::ZERO);
            prop_assert!(size <= balance);
        }

        #[test]
        fn prop_stops_bracket_entry(entry in 1u64..200_000, vol in 0.0f64..10.0) {
            let m = manager();
            let entry = Decimal::from(entry);
            let state = state();

            let long = m.plan_entry(Side::Buy, entry, dec!(1000), 0.5, Some(vol), &state);
            prop_assert!(long.stop_loss_price < entry && entry < long.take_profit_price);

            let short = m.plan_entry(Side::Sell, entry, dec!(1000), 0.5, Some(vol), &state);
            prop_assert!(short.take_profit_price < entry && entry < short.stop_loss_price);
        }
    }
}
