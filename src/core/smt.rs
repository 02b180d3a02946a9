use serde::{Deserialize, Serialize};

use crate::models::{BarSeries, Bias};

/// Current and previous window extremes for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmtSnapshot {
    pub high: f64,
    pub low: f64,
    pub prev_high: f64,
    pub prev_low: f64,
}

impl SmtSnapshot {
    /// Current = extremes of the last `window` bars, previous = extremes of the
    /// `window` bars before those. `None` without `2 * window` bars.
    pub fn from_bars(bars: &BarSeries, window: usize) -> Option<Self> {
        let w = window.max(1);
        let n = bars.len();
        if n < w * 2 {
            return None;
        }
        let current = bars.slice(n - w, n);
        let previous = bars.slice(n - 2 * w, n - w);
        Some(Self {
            high: current.highs_max()?,
            low: current.lows_min()?,
            prev_high: previous.highs_max()?,
            prev_low: previous.lows_min()?,
        })
    }
}

/// Primary instrument paired with its correlate for divergence checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedPair {
    pub symbol: String,
    pub primary: SmtSnapshot,
    pub correlated: SmtSnapshot,
}

/// Bearish when the primary makes a higher high the correlate does not
/// confirm; otherwise bullish when the primary makes an unconfirmed lower low.
pub fn detect_smt(primary: &SmtSnapshot, correlated: &SmtSnapshot) -> Option<Bias> {
    if primary.high > primary.prev_high && correlated.high <= correlated.prev_high {
        return Some(Bias::Bearish);
    }
    if primary.low < primary.prev_low && correlated.low >= correlated.prev_low {
        return Some(Bias::Bullish);
    }
    None
}
