//! Trading logic: confidence scoring, risk management, entry signals and the
//! position lifecycle.

pub mod confidence;
mod config;
mod lifecycle;
mod risk;
pub mod signal;

pub use config::{RiskConfig, SignalConfig};
pub use lifecycle::{check_exit, Decision, MarketView, PositionMachine};
pub use risk::{drawdown, EntryPlan, EntryValidation, RiskManager};
