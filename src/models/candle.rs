//! Candle (OHLCV) model and the per-cycle candle series.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Immutable, ascending-timestamp window of candles fetched for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series, sorting by timestamp so callers can rely on ascending order.
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        Self { candles }
    }

    /// Keep only the most recent `limit` bars.
    pub fn window(mut self, limit: usize) -> Self {
        if self.candles.len() > limit {
            let excess = self.candles.len() - limit;
            self.candles.drain(..excess);
        }
        self
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Latest close, the price every exit check runs against.
    pub fn latest_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

/// Parse an exchange timeframe such as `5m`, `1h`, `1d` into a bar duration.
pub fn parse_timeframe(timeframe: &str) -> Option<Duration> {
    let timeframe = timeframe.trim();
    let (split, _) = timeframe.char_indices().last()?;
    if split == 0 {
        return None;
    }
    let (amount, unit) = timeframe.split_at(split);
    let amount: i64 = amount.parse().ok().filter(|n| *n > 0)?;

    match unit {
        "m" => Some(Duration::minutes(amount)),
        "h" => Some(Duration::hours(amount)),
        "d" => Some(Duration::days(amount)),
        "w" => Some(Duration::weeks(amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(minute: i64, close: f64) -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle::new(ts, close, close, close, close, 10.0)
    }

    #[test]
    fn test_series_sorted_and_windowed() {
        let series = CandleSeries::new(vec![bar(10, 3.0), bar(0, 1.0), bar(5, 2.0)]);
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);

        let series = series.window(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![2.0, 3.0]);
        assert_eq!(series.latest_close(), Some(3.0));
    }

    #[test]
    fn test_empty_series() {
        let series = CandleSeries::default();
        assert!(series.is_empty());
        assert_eq!(series.latest_close(), None);
    }

    #[test]
    fn test_parse_timeframe() {
        assert_eq!(parse_timeframe("5m"), Some(Duration::minutes(5)));
        assert_eq!(parse_timeframe("4h"), Some(Duration::hours(4)));
        assert_eq!(parse_timeframe("1d"), Some(Duration::days(1)));
        assert_eq!(parse_timeframe("0m"), None);
        assert_eq!(parse_timeframe("m"), None);
        assert_eq!(parse_timeframe("5x"), None);
        assert_eq!(parse_timeframe(""), None);
    }

    #[test]
    fn test_parse_timeframe_non_ascii_unit() {
        assert_eq!(parse_timeframe("5м"), None);
        assert_eq!(parse_timeframe("м"), None);
        assert_eq!(parse_timeframe("١5m"), None);
    }
}
