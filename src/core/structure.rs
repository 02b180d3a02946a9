use serde::{Deserialize, Serialize};

use crate::core::swings::{find_swings, SwingPoint};
use crate::models::{BarSeries, Bias, SwingKind, Trend};

/// Break of structure: a swing that takes out the previous swing of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BosEvent {
    pub index: usize,
    pub price: f64,
    pub direction: Bias,
}

pub struct MarketStructure {
    pub swing_lookback: usize,
    pub swings: Vec<SwingPoint>,
    pub trend: Trend,
    pub bos_events: Vec<BosEvent>,
}

impl MarketStructure {
    pub fn new() -> Self {
        Self::with_lookback(3)
    }

    pub fn with_lookback(swing_lookback: usize) -> Self {
        Self {
            swing_lookback,
            swings: Vec::new(),
            trend: Trend::Neutral,
            bos_events: Vec::new(),
        }
    }

    pub fn analyze(&mut self, bars: &BarSeries) -> Trend {
        self.swings = find_swings(bars, self.swing_lookback);
        self.bos_events = detect_bos(&self.swings);
        self.trend = classify_trend(&self.swings);
        self.trend
    }

    pub fn swing_highs(&self) -> impl Iterator<Item = &SwingPoint> {
        self.swings.iter().filter(|s| s.kind == SwingKind::High)
    }

    pub fn swing_lows(&self) -> impl Iterator<Item = &SwingPoint> {
        self.swings.iter().filter(|s| s.kind == SwingKind::Low)
    }
}

impl Default for MarketStructure {
    fn default() -> Self {
        Self::new()
    }
}

/// Compares the last two swing highs and the last two swing lows.
pub fn classify_trend(swings: &[SwingPoint]) -> Trend {
    let last_two = |kind: SwingKind| -> Option<(f64, f64)> {
        let mut it = swings.iter().rev().filter(|s| s.kind == kind);
        let last = it.next()?;
        let prev = it.next()?;
        Some((prev.price, last.price))
    };

    let (Some((prev_high, high)), Some((prev_low, low))) =
        (last_two(SwingKind::High), last_two(SwingKind::Low))
    else {
        return Trend::Neutral;
    };

    if high > prev_high && low > prev_low {
        Trend::Bullish
    } else if high < prev_high && low < prev_low {
        Trend::Bearish
    } else {
        Trend::Range
    }
}

/// Walks swings in order; each kind is compared only with its own predecessor.
pub fn detect_bos(swings: &[SwingPoint]) -> Vec<BosEvent> {
    let mut events = Vec::new();
    let mut last_high: Option<f64> = None;
    let mut last_low: Option<f64> = None;

    for s in swings {
        match s.kind {
            SwingKind::High => {
                if matches!(last_high, Some(prev) if s.price > prev) {
                    events.push(BosEvent {
                        index: s.index,
                        price: s.price,
                        direction: Bias::Bullish,
                    });
                }
                last_high = Some(s.price);
            }
            SwingKind::Low => {
                if matches!(last_low, Some(prev) if s.price < prev) {
                    events.push(BosEvent {
                        index: s.index,
                        price: s.price,
                        direction: Bias::Bearish,
                    });
                }
                last_low = Some(s.price);
            }
        }
    }

    events
}
