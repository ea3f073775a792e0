//! Technical indicators computed from the per-cycle candle series.

pub mod series;
mod snapshot;

pub use snapshot::{IndicatorSet, IndicatorSettings};
