//! Data models for candles, positions, and closed trades.

mod candle;
mod position;
mod trade;

pub use candle::{parse_timeframe, Candle, CandleSeries};
pub use position::Position;
pub use trade::{ExitReason, Side, TradeRecord};
