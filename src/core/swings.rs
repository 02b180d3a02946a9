use serde::{Deserialize, Serialize};

use crate::models::{BarSeries, SwingKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub index: usize,
    pub price: f64,
}

/// Local extremes over the inclusive window `[i - lookback, i + lookback]`.
///
/// Only positions `lookback <= i < n - lookback` are candidates. The window
/// includes the candidate itself, so bars tying for the extreme inside one
/// window are all reported. At a given index the high is listed before the low.
pub fn find_swings(bars: &BarSeries, lookback: usize) -> Vec<SwingPoint> {
    let lb = lookback.max(1);
    let len = bars.len();
    let mut swings = Vec::new();
    if len <= lb * 2 {
        return swings;
    }

    for i in lb..(len - lb) {
        let bar = &bars[i];
        if !bar.is_well_formed() {
            continue;
        }
        let window = &bars.as_slice()[i - lb..=i + lb];

        let max_high = window
            .iter()
            .filter(|b| b.is_well_formed())
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        if bar.high == max_high {
            swings.push(SwingPoint {
                kind: SwingKind::High,
                index: i,
                price: bar.high,
            });
        }

        let min_low = window
            .iter()
            .filter(|b| b.is_well_formed())
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);
        if bar.low == min_low {
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                index: i,
                price: bar.low,
            });
        }
    }

    swings
}
