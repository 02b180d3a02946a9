use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{Bar, BarSeries};

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create bars from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> BarSeries {
    let base = base_time();
    let bars: Vec<Bar> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    BarSeries::new(bars)
}

/// Bars centred on each price with a fixed 0.002 half-range.
fn bars_around(prices: &[f64]) -> BarSeries {
    let data: Vec<(f64, f64, f64, f64)> = prices
        .iter()
        .map(|&p| (p, p + 0.002, p - 0.002, p))
        .collect();
    make_bars(&data)
}

/// n bars whose highs and lows rise strictly by `step`.
pub fn make_rising(n: usize, start: f64, step: f64) -> BarSeries {
    let prices: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
    bars_around(&prices)
}

/// n bars whose highs and lows fall strictly by `step`.
pub fn make_falling(n: usize, start: f64, step: f64) -> BarSeries {
    let prices: Vec<f64> = (0..n).map(|i| start - i as f64 * step).collect();
    bars_around(&prices)
}

/// Offsets of a zigzag that makes a higher high and a higher low every wave.
/// Each wave is five rising bars (peak on the fifth) and five falling bars
/// (trough on the tenth); four trailing rising bars close the last trough.
fn wave_offsets(waves: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(waves * 10 + 4);
    for w in 0..waves {
        let base = w as f64 * 0.02;
        for k in 0..5 {
            out.push(base + k as f64 * 0.01);
        }
        for k in 1..=5 {
            out.push(base + 0.04 - k as f64 * 0.006);
        }
    }
    let next = waves as f64 * 0.02;
    for k in 0..4 {
        out.push(next + k as f64 * 0.01);
    }
    out
}

/// Zigzag with rising swing highs and lows at lookback 3.
pub fn make_bullish_waves(waves: usize, start: f64) -> BarSeries {
    let prices: Vec<f64> = wave_offsets(waves).iter().map(|o| start + o).collect();
    bars_around(&prices)
}

/// Mirror image of [`make_bullish_waves`].
pub fn make_bearish_waves(waves: usize, start: f64) -> BarSeries {
    let prices: Vec<f64> = wave_offsets(waves).iter().map(|o| start - o).collect();
    bars_around(&prices)
}

/// A Config suitable for testing: no bridge, no persistence, no calendar.
pub fn default_test_config() -> Config {
    Config {
        symbols: vec!["EURUSD".to_string(), "GBPUSD".to_string()],
        persistence_url: None,
        persistence_key: None,
        news_calendar_path: None,
        poll_interval_secs: 1,
        log_level: "ERROR".to_string(),
        ..Config::default()
    }
}
