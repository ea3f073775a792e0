//! Latest-bar indicator snapshot consumed by the scorer, signal rules and risk manager.

use serde::{Deserialize, Serialize};

use super::series::{self, BOLLINGER_K, DEFAULT_WINDOW, MACD_FAST, MACD_SIGNAL, MACD_SLOW};
use crate::models::CandleSeries;

/// Periods used to build an [`IndicatorSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub ema_short: usize,
    pub ema_medium: usize,
    pub ema_long: usize,
    /// Window for Bollinger bands, volatility and volume profile
    pub window: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_short: 9,
            ema_medium: 21,
            ema_long: 50,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Indicator values at the most recent bar.
///
/// Every series-derived value is optional. A warm-up bar is `None`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: Option<f64>,
    pub rsi: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_medium: Option<f64>,
    pub ema_long: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_mid: Option<f64>,
    pub bb_lower: Option<f64>,
    pub volatility: Option<f64>,
    /// Latest volume over its rolling mean; 1.0 when that mean is unusable
    pub volume_profile: f64,
}

impl IndicatorSet {
    /// Compute the snapshot for the last bar of `candles`.
    pub fn compute(candles: &CandleSeries, settings: &IndicatorSettings) -> Self {
        let closes = candles.closes();
        let volumes = candles.volumes();

        if closes.is_empty() {
            return Self {
                volume_profile: 1.0,
                ..Self::default()
            };
        }

        let last = |v: Vec<f64>| v.last().copied();
        let macd = series::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let bb = series::bollinger(&closes, settings.window, BOLLINGER_K);

        Self {
            close: closes.last().copied(),
            rsi: series::latest(&series::rsi(&closes, settings.rsi_period)),
            ema_short: last(series::ema(&closes, settings.ema_short)),
            ema_medium: last(series::ema(&closes, settings.ema_medium)),
            ema_long: last(series::ema(&closes, settings.ema_long)),
            macd: macd.macd.last().copied(),
            macd_signal: macd.signal.last().copied(),
            macd_histogram: macd.histogram.last().copied(),
            bb_upper: series::latest(&bb.upper),
            bb_mid: series::latest(&bb.mid),
            bb_lower: series::latest(&bb.lower),
            volatility: series::volatility(&closes, settings.window),
            volume_profile: series::volume_profile(&volumes, settings.window),
        }
    }

    /// Position of the close inside the Bollinger envelope (0 = lower, 1 = upper).
    /// Undefined when the bands are missing or have zero width.
    pub fn bb_position(&self) -> Option<f64> {
        let (close, upper, lower) = (self.close?, self.bb_upper?, self.bb_lower?);
        let width = upper - lower;
        if width <= 0.0 {
            return None;
        }
        Some((close - lower) / width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn series_from(closes: &[f64]) -> CandleSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        CandleSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Candle::new(start + Duration::minutes(5 * i as i64), c, c, c, c, 100.0))
                .collect(),
        )
    }

    #[test]
    fn test_empty_series_is_all_undefined() {
        let set = IndicatorSet::compute(&CandleSeries::default(), &IndicatorSettings::default());
        assert_eq!(set.close, None);
        assert_eq!(set.rsi, None);
        assert_eq!(set.ema_short, None);
        assert_eq!(set.volume_profile, 1.0);
        assert_eq!(set.bb_position(), None);
    }

    #[test]
    fn test_short_history_leaves_windows_undefined() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let set = IndicatorSet::compute(&series_from(&closes), &IndicatorSettings::default());
        assert_eq!(set.close, Some(109.0));
        assert!(set.ema_short.is_some());
        assert!(set.rsi.is_none());
        assert!(set.bb_upper.is_none());
        assert!(set.volatility.is_none());
        assert_eq!(set.volume_profile, 1.0);
    }

    #[test]
    fn test_full_history_is_defined() {
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1)
            .collect();
        let set = IndicatorSet::compute(&series_from(&closes), &IndicatorSettings::default());
        assert!(set.rsi.is_some());
        assert!(set.ema_long.is_some());
        assert!(set.macd_histogram.is_some());
        assert!(set.volatility.is_some());
        let pos = set.bb_position().unwrap();
        assert!(pos.is_finite());
    }

    #[test]
    fn test_bb_position() {
        let set = IndicatorSet {
            close: Some(105.0),
            bb_upper: Some(110.0),
            bb_lower: Some(100.0),
            ..IndicatorSet::default()
        };
        assert_eq!(set.bb_position(), Some(0.5));

        let flat = IndicatorSet {
            close: Some(100.0),
            bb_upper: Some(100.0),
            bb_lower: Some(100.0),
            ..IndicatorSet::default()
        };
        assert_eq!(flat.bb_position(), None);
    }
}
