//! Indicator functions over close/volume series.
//!
//! Every function is pure. Rolling outputs are index-aligned with the input and
//! hold `None` until their window has filled, so callers can never mistake a
//! warm-up bar for a zero reading.

use statrs::statistics::Statistics;

/// Rolling window width for Bollinger bands, volatility and volume profile.
pub const DEFAULT_WINDOW: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Relative Strength Index using a simple rolling mean of gains and losses.
///
/// Bar `i` is defined once `period` price changes are available (`i >= period`).
/// A flat window (no gains, no losses) stays undefined.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    for i in period..closes.len() {
        // changes[i - 1] is the move into bar i
        let window = &changes[i - period..i];
        let avg_gain = window.iter().map(|&d| d.max(0.0)).sum::<f64>() / period as f64;
        let avg_loss = window.iter().map(|&d| (-d).max(0.0)).sum::<f64>() / period as f64;

        out[i] = if avg_loss == 0.0 {
            (avg_gain > 0.0).then_some(100.0)
        } else {
            let rs = avg_gain / avg_loss;
            Some(100.0 - 100.0 / (1.0 + rs))
        };
    }
    out
}

/// Exponential moving average seeded with the first value, `alpha = 2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal_period);
    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();
    Macd {
        macd: line,
        signal,
        histogram,
    }
}

/// Bollinger bands: rolling mean ± `k` sample standard deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub upper: Vec<Option<f64>>,
    pub mid: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger(closes: &[f64], window: usize, k: f64) -> Bollinger {
    let mid = rolling_mean(closes, window);
    let std = rolling_std(closes, window);

    let band = |sign: f64| -> Vec<Option<f64>> {
        mid.iter()
            .zip(&std)
            .map(|(m, s)| Some(m.as_ref()? + sign * k * s.as_ref()?))
            .collect()
    };

    Bollinger {
        upper: band(1.0),
        lower: band(-1.0),
        mid,
    }
}

/// Latest rolling standard deviation of bar-to-bar percent change, scaled ×100.
///
/// Needs `window + 1` closes. A zero previous close yields an undefined change.
pub fn volatility(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }
    let changes: Vec<f64> = closes[closes.len() - window - 1..]
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if changes.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let std: f64 = changes.iter().std_dev();
    std.is_finite().then_some(std * 100.0)
}

/// Latest volume relative to its rolling mean. Defaults to 1.0 when the mean
/// is undefined or zero.
pub fn volume_profile(volumes: &[f64], window: usize) -> f64 {
    let Some(current) = volumes.last() else {
        return 1.0;
    };
    match rolling_mean(volumes, window).last().copied().flatten() {
        Some(avg) if avg > 0.0 => current / avg,
        _ => 1.0,
    }
}

/// Simple moving average, `None` until `window` values are available.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().mean())
}

/// Rolling sample standard deviation (n − 1).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    rolling(values, window, |w| w.iter().std_dev())
}

fn rolling(values: &[f64], window: usize, f: impl Fn(&[f64]) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for end in window..=values.len() {
        let v = f(&values[end - window..end]);
        out[end - 1] = v.is_finite().then_some(v);
    }
    out
}

/// Last element of an aligned series, flattened.
pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (100..120).map(f64::from).collect();
        assert_eq!(closes.len(), 20);

        let out = rsi(&closes, 14);
        assert!(out[..14].iter().all(Option::is_none));
        assert_eq!(out[19], Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses_is_0() {
        let closes: Vec<f64> = (0..16).map(|i| 200.0 - i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(latest(&out), Some(0.0));
    }

    #[test]
    fn test_rsi_balanced_is_50() {
        // alternating +1 / -1 moves
        let closes: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let out = rsi(&closes, 14);
        assert!(approx(latest(&out).unwrap(), 50.0));
    }

    #[test]
    fn test_rsi_flat_is_undefined() {
        let closes = vec![100.0; 30];
        assert!(rsi(&closes, 14).iter().all(Option::is_none));
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        // alpha = 0.5
        assert_eq!(out, vec![10.0, 15.0, 22.5]);
        assert!(ema(&[], 9).is_empty());
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let closes = vec![50.0; 40];
        let m = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert_eq!(m.macd.len(), 40);
        assert!(m.macd.iter().all(|v| approx(*v, 0.0)));
        assert!(m.histogram.iter().all(|v| approx(*v, 0.0)));
    }

    #[test]
    fn test_macd_rising_series_positive() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let m = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert!(*m.macd.last().unwrap() > 0.0);
        assert!(*m.macd.last().unwrap() > *m.signal.last().unwrap());
    }

    #[test]
    fn test_bollinger_bands() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let bb = bollinger(&closes, 5, 2.0);
        assert!(bb.mid[3].is_none());
        let mid = bb.mid[4].unwrap();
        let upper = bb.upper[4].unwrap();
        let lower = bb.lower[4].unwrap();
        assert!(approx(mid, 3.0));
        // sample std of 1..=5 is sqrt(2.5)
        assert!(approx(upper - mid, 2.0 * 2.5_f64.sqrt()));
        assert!(approx(mid - lower, 2.0 * 2.5_f64.sqrt()));
    }

    #[test]
    fn test_volatility_window() {
        let constant_growth: Vec<f64> = (0..21).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let vol = volatility(&constant_growth, 20).unwrap();
        assert!(vol.abs() < 1e-9);

        assert_eq!(volatility(&constant_growth[..20], 20), None);
    }

    #[test]
    fn test_volume_profile() {
        let mut volumes = vec![10.0; 19];
        volumes.push(30.0);
        // mean = (19 * 10 + 30) / 20 = 11
        assert!(approx(volume_profile(&volumes, 20), 30.0 / 11.0));

        assert_eq!(volume_profile(&volumes[..5], 20), 1.0);
        assert_eq!(volume_profile(&vec![0.0; 20], 20), 1.0);
        assert_eq!(volume_profile(&[], 20), 1.0);
    }
}
