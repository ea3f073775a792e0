//! FLAT / OPEN position lifecycle.
//!
//! [`PositionMachine::decide`] is a pure function of the state snapshot and the
//! cycle's market view. The engine applies the returned [`Decision`] only after
//! the matching order has been accepted, so a failed order leaves the state as
//! it was.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{signal, EntryPlan, RiskManager, SignalConfig};
use crate::indicators::IndicatorSet;
use crate::models::{ExitReason, Position};
use crate::state::TradingState;

/// What the engine observed this cycle.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub indicators: IndicatorSet,
    pub confidence: f64,
    /// Latest candle close
    pub price: Decimal,
    /// Free quote-currency balance
    pub available_balance: Decimal,
}

/// Outcome of one lifecycle evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Hold,
    Open(EntryPlan),
    Close { reason: ExitReason, price: Decimal },
}

/// Exit check in priority order: take-profit, stop-loss, then age.
pub fn check_exit(
    position: &Position,
    price: Decimal,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Option<ExitReason> {
    if position.take_profit_hit(price) {
        return Some(ExitReason::TakeProfit);
    }
    if position.stop_loss_hit(price) {
        return Some(ExitReason::StopLoss);
    }
    if position.age(now) > max_age {
        return Some(ExitReason::TimeExit);
    }
    None
}

/// Ties the signal rules and the risk manager into FLAT/OPEN transitions.
#[derive(Debug, Clone)]
pub struct PositionMachine {
    risk: RiskManager,
    signal: SignalConfig,
    max_age: Duration,
}

impl PositionMachine {
    pub fn new(risk: RiskManager, signal: SignalConfig) -> Self {
        let max_age = Duration::hours(risk.config().max_position_age_hours);
        Self {
            risk,
            signal,
            max_age,
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Decide the transition for this cycle.
    pub fn decide(
        &self,
        state: &TradingState,
        market: &MarketView,
        trading_enabled: bool,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(position) = &state.position {
            return match check_exit(position, market.price, now, self.max_age) {
                Some(reason) => {
                    info!(
                        reason = %reason,
                        price = %market.price,
                        entry = %position.entry_price,
                        "Exit condition met"
                    );
                    Decision::Close {
                        reason,
                        price: market.price,
                    }
                }
                None => {
                    debug!(price = %market.price, "Position held");
                    Decision::Hold
                }
            };
        }

        if !trading_enabled {
            debug!("Trading disabled, skipping entry evaluation");
            return Decision::Hold;
        }

        let gate = self.risk.can_open_position(state);
        if !gate.allowed {
            info!(reason = %gate.reason, "Cannot open new position");
            return Decision::Hold;
        }

        let Some(side) = signal::evaluate(&market.indicators, &self.signal) else {
            return Decision::Hold;
        };

        if market.price <= Decimal::ZERO {
            warn!(price = %market.price, "Ignoring signal on non-positive price");
            return Decision::Hold;
        }

        let plan = self.risk.plan_entry(
            side,
            market.price,
            market.available_balance,
            market.confidence,
            market.indicators.volatility,
            state,
        );
        if plan.size <= Decimal::ZERO {
            warn!(balance = %market.available_balance, "Signal ignored, computed size is zero");
            return Decision::Hold;
        }

        info!(
            side = %side,
            size = %plan.size,
            leverage = plan.leverage,
            stop_loss = %plan.stop_loss_price,
            take_profit = %plan.take_profit_price,
            "Entry signal"
        );
        Decision::Open(plan)
    }
}

impl EntryPlan {
    /// Position record for an accepted entry order. The planned price is kept
    /// as the entry price so SL/TP stay consistent with it.
    pub fn into_position(self, now: DateTime<Utc>) -> Position {
        Position {
            side: self.side,
            entry_price: self.entry_price,
            entry_time: now,
            size: self.size,
            leverage: self.leverage,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
        }
    }
}
