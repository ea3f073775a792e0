//! Entry rules applied to the latest indicator snapshot.

use tracing::debug;

use super::SignalConfig;
use crate::indicators::IndicatorSet;
use crate::models::Side;

/// Inputs both entry rules need. Absent when any of them is undefined.
struct RuleInputs {
    rsi: f64,
    ema_short: f64,
    ema_medium: f64,
    ema_long: f64,
    macd: f64,
    macd_signal: f64,
    close: f64,
    volume_profile: f64,
}

impl RuleInputs {
    fn from_indicators(set: &IndicatorSet) -> Option<Self> {
        Some(Self {
            rsi: set.rsi?,
            ema_short: set.ema_short?,
            ema_medium: set.ema_medium?,
            ema_long: set.ema_long?,
            macd: set.macd?,
            macd_signal: set.macd_signal?,
            close: set.close?,
            volume_profile: set.volume_profile,
        })
    }
}

/// Decide the entry side for this cycle, if any.
///
/// Undefined indicators never produce a signal.
pub fn evaluate(set: &IndicatorSet, config: &SignalConfig) -> Option<Side> {
    let inputs = RuleInputs::from_indicators(set)?;

    let long = long_rule(&inputs, config);
    let short = short_rule(&inputs, config);
    debug_assert!(!(long && short), "long and short rules both matched");

    let side = match (long, short) {
        (true, false) => Some(Side::Buy),
        (false, true) => Some(Side::Sell),
        _ => None,
    };
    debug!(rsi = inputs.rsi, long, short, "Signal evaluated");
    side
}

fn long_rule(i: &RuleInputs, config: &SignalConfig) -> bool {
    i.rsi > config.rsi_oversold
        && i.rsi < config.long_rsi_ceiling
        && i.ema_short > i.ema_medium
        && i.macd > i.macd_signal
        && i.close > i.ema_long
        && i.volume_profile > config.volume_threshold
}

fn short_rule(i: &RuleInputs, config: &SignalConfig) -> bool {
    i.rsi < config.rsi_overbought
        && i.rsi > config.short_rsi_floor
        && i.ema_short < i.ema_medium
        && i.macd < i.macd_signal
        && i.close < i.ema_long
        && i.volume_profile > config.volume_threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bullish() -> IndicatorSet {
        IndicatorSet {
            close: Some(105.0),
            rsi: Some(55.0),
            ema_short: Some(104.0),
            ema_medium: Some(103.0),
            ema_long: Some(100.0),
            macd: Some(1.2),
            macd_signal: Some(0.8),
            volume_profile: 2.0,
            ..IndicatorSet::default()
        }
    }

    fn bearish() -> IndicatorSet {
        IndicatorSet {
            close: Some(95.0),
            rsi: Some(45.0),
            ema_short: Some(96.0),
            ema_medium: Some(97.0),
            ema_long: Some(100.0),
            macd: Some(-1.2),
            macd_signal: Some(-0.8),
            volume_profile: 2.0,
            ..IndicatorSet::default()
        }
    }

    #[test]
    fn test_long_signal() {
        assert_eq!(evaluate(&bullish(), &SignalConfig::default()), Some(Side::Buy));
    }

    #[test]
    fn test_short_signal() {
        assert_eq!(evaluate(&bearish(), &SignalConfig::default()), Some(Side::Sell));
    }

    #[test]
    fn test_rsi_band_blocks_long() {
        let mut set = bullish();
        set.rsi = Some(65.0);
        assert_eq!(evaluate(&set, &SignalConfig::default()), None);
        set.rsi = Some(25.0);
        assert_eq!(evaluate(&set, &SignalConfig::default()), None);
    }

    #[test]
    fn test_low_volume_blocks_entry() {
        let mut set = bullish();
        set.volume_profile = 1.5;
        assert_eq!(evaluate(&set, &SignalConfig::default()), None);
    }

    #[test]
    fn test_undefined_indicator_blocks_entry() {
        let mut set = bullish();
        set.rsi = None;
        assert_eq!(evaluate(&set, &SignalConfig::default()), None);
        assert_eq!(evaluate(&IndicatorSet::default(), &SignalConfig::default()), None);
    }

    proptest! {
        #[test]
        fn prop_rules_never_both_match(
            rsi in 0.0f64..100.0,
            s in 50.0f64..150.0,
            m in 50.0f64..150.0,
            l in 50.0f64..150.0,
            macd in -5.0f64..5.0,
            sig in -5.0f64..5.0,
            close in 50.0f64..150.0,
            vp in 0.0f64..5.0,
        ) {
            let inputs = RuleInputs {
                rsi, ema_short: s, ema_medium: m, ema_long: l,
                macd, macd_signal: sig, close, volume_profile: vp,
            };
            let config = SignalConfig::default();
            prop_assert!(!(long_rule(&inputs, &config) && short_rule(&inputs, &config)));
        }
    }
}
