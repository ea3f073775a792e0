//! Heuristic confidence score driving leverage selection.
//!
//! Five factors are read from the latest [`IndicatorSet`] and blended with
//! fixed weights. The score is recomputed every cycle and never carried over.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::indicators::IndicatorSet;

/// Weights for RSI, EMA alignment, volume, volatility and Bollinger position.
pub const WEIGHTS: [f64; 5] = [0.30, 0.20, 0.15, 0.15, 0.20];

/// Score returned when any factor input is undefined.
pub const FALLBACK_CONFIDENCE: f64 = 0.85;

/// Multiplier applied while cumulative P&L is negative.
const LOSING_PENALTY: f64 = 0.8;

/// Individual factor readings, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceFactors {
    pub rsi: f64,
    pub ema_alignment: f64,
    pub volume: f64,
    pub volatility: f64,
    pub bollinger: f64,
}

impl ConfidenceFactors {
    /// Read the factors from a snapshot. `None` if any input is undefined.
    pub fn from_indicators(set: &IndicatorSet) -> Option<Self> {
        Some(Self {
            rsi: rsi_factor(set.rsi?),
            ema_alignment: ema_alignment_factor(set.ema_short?, set.ema_medium?, set.ema_long?),
            volume: volume_factor(set.volume_profile),
            volatility: volatility_factor(set.volatility?),
            bollinger: bollinger_factor(set.bb_position()?),
        })
    }

    pub fn weighted_sum(&self) -> f64 {
        let values = [self.rsi, self.ema_alignment, self.volume, self.volatility, self.bollinger];
        values.iter().zip(WEIGHTS).map(|(v, w)| v * w).sum()
    }
}

/// Compute the confidence score in [0, 1].
pub fn score(set: &IndicatorSet, cumulative_pnl: Decimal) -> f64 {
    let Some(factors) = ConfidenceFactors::from_indicators(set) else {
        debug!("Indicator inputs incomplete, using fallback confidence");
        info!(confidence = FALLBACK_CONFIDENCE, "Confidence calculated");
        return FALLBACK_CONFIDENCE;
    };

    let mut confidence = factors.weighted_sum();
    if cumulative_pnl < Decimal::ZERO {
        confidence *= LOSING_PENALTY;
    }
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        FALLBACK_CONFIDENCE
    };

    info!(
        confidence,
        rsi = factors.rsi,
        ema = factors.ema_alignment,
        volume = factors.volume,
        volatility = factors.volatility,
        bollinger = factors.bollinger,
        "Confidence calculated"
    );
    confidence
}

/// More confidence the deeper RSI sits in either extreme.
fn rsi_factor(rsi: f64) -> f64 {
    if rsi < 30.0 {
        1.0 - rsi / 30.0
    } else if rsi > 70.0 {
        (rsi - 70.0) / 30.0
    } else {
        0.3
    }
}

fn ema_alignment_factor(short: f64, medium: f64, long: f64) -> f64 {
    let short_above = short > medium;
    let medium_above = medium > long;
    if (short_above && medium_above) || (short < medium && medium < long) {
        0.8
    } else if short_above != medium_above {
        0.5
    } else {
        0.3
    }
}

fn volume_factor(volume_profile: f64) -> f64 {
    (volume_profile / 2.0).clamp(0.0, 1.0)
}

/// Peaks at 0.5 and reaches zero again at 2.5.
fn volatility_factor(volatility: f64) -> f64 {
    if volatility < 0.5 {
        (volatility / 0.5).max(0.0)
    } else {
        (1.0 - (volatility - 0.5) / 2.0).max(0.0)
    }
}

fn bollinger_factor(bb_position: f64) -> f64 {
    if !(0.2..=0.8).contains(&bb_position) {
        0.8
    } else {
        0.4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn oversold_uptrend() -> IndicatorSet {
        IndicatorSet {
            close: Some(101.0),
            rsi: Some(25.0),
            ema_short: Some(103.0),
            ema_medium: Some(102.0),
            ema_long: Some(100.0),
            bb_upper: Some(120.0),
            bb_lower: Some(100.0),
            volatility: Some(0.25),
            volume_profile: 1.0,
            ..IndicatorSet::default()
        }
    }

    #[test]
    fn test_factor_blend() {
        // 0.3 * (1 - 25/30) + 0.2 * 0.8 + 0.15 * 0.5 + 0.15 * 0.5 + 0.2 * 0.8
        let set = oversold_uptrend();
        assert!(approx(score(&set, Decimal::ZERO), 0.52));
    }

    #[test]
    fn test_losing_penalty() {
        let set = oversold_uptrend();
        assert!(approx(score(&set, dec!(-10)), 0.416));
        assert!(approx(score(&set, dec!(10)), 0.52));
    }

    #[test]
    fn test_fallback_on_missing_inputs() {
        assert_eq!(score(&IndicatorSet::default(), Decimal::ZERO), FALLBACK_CONFIDENCE);

        let mut set = oversold_uptrend();
        set.volatility = None;
        assert_eq!(score(&set, Decimal::ZERO), FALLBACK_CONFIDENCE);

        let mut flat_bands = oversold_uptrend();
        flat_bands.bb_upper = Some(100.0);
        assert_eq!(score(&flat_bands, Decimal::ZERO), FALLBACK_CONFIDENCE);
    }

    #[test]
    fn test_rsi_factor() {
        assert!(approx(rsi_factor(0.0), 1.0));
        assert!(approx(rsi_factor(15.0), 0.5));
        assert!(approx(rsi_factor(50.0), 0.3));
        assert!(approx(rsi_factor(85.0), 0.5));
        assert!(approx(rsi_factor(100.0), 1.0));
    }

    #[test]
    fn test_ema_alignment_factor() {
        assert_eq!(ema_alignment_factor(3.0, 2.0, 1.0), 0.8);
        assert_eq!(ema_alignment_factor(1.0, 2.0, 3.0), 0.8);
        assert_eq!(ema_alignment_factor(3.0, 1.0, 2.0), 0.5);
        assert_eq!(ema_alignment_factor(1.0, 3.0, 2.0), 0.5);
        assert_eq!(ema_alignment_factor(2.0, 2.0, 2.0), 0.3);
    }

    #[test]
    fn test_volatility_factor_shape() {
        assert_eq!(volatility_factor(0.0), 0.0);
        assert!(approx(volatility_factor(0.25), 0.5));
        assert!(approx(volatility_factor(0.5), 1.0));
        assert!(approx(volatility_factor(1.5), 0.5));
        assert_eq!(volatility_factor(2.5), 0.0);
        assert_eq!(volatility_factor(10.0), 0.0);
    }

    #[test]
    fn test_bollinger_factor() {
        assert_eq!(bollinger_factor(0.1), 0.8);
        assert_eq!(bollinger_factor(0.5), 0.4);
        assert_eq!(bollinger_factor(1.3), 0.8);
    }

    proptest! {
        #[test]
        fn prop_confidence_in_unit_range(
            rsi in 0.0f64..=100.0,
            ema_s in 1.0f64..1000.0,
            ema_m in 1.0f64..1000.0,
            ema_l in 1.0f64..1000.0,
            volume in 0.0f64..50.0,
            volatility in 0.0f64..20.0,
            close in 1.0f64..1000.0,
            lower in 1.0f64..1000.0,
            width in 0.01f64..500.0,
            pnl in -10_000i64..10_000,
        ) {
            let set = IndicatorSet {
                close: Some(close),
                rsi: Some(rsi),
                ema_short: Some(ema_s),
                ema_medium: Some(ema_m),
                ema_long: Some(ema_l),
                bb_upper: Some(lower + width),
                bb_lower: Some(lower),
                volatility: Some(volatility),
                volume_profile: volume,
                ..IndicatorSet::default()
            };
            let c = score(&set, Decimal::from(pnl));
            prop_assert!((0.0..=1.0).contains(&c));
        }
    }
}
