use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Finite prices and a non-inverted range. Scans skip bars that fail this.
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
            && self.high >= self.low
    }
}

/// Ordered, append-only bar history for one (symbol, timeframe).
/// A bar's index is its position in the series.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn tail(&self, n: usize) -> BarSeries {
        let start = self.bars.len().saturating_sub(n);
        BarSeries::new(self.bars[start..].to_vec())
    }

    pub fn slice(&self, start: usize, end: usize) -> BarSeries {
        let s = start.min(self.bars.len());
        let e = end.min(self.bars.len()).max(s);
        BarSeries::new(self.bars[s..e].to_vec())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    /// Highest high over well-formed bars, `None` when there are none.
    pub fn highs_max(&self) -> Option<f64> {
        self.bars
            .iter()
            .filter(|b| b.is_well_formed())
            .map(|b| b.high)
            .reduce(f64::max)
    }

    /// Lowest low over well-formed bars, `None` when there are none.
    pub fn lows_min(&self) -> Option<f64> {
        self.bars
            .iter()
            .filter(|b| b.is_well_formed())
            .map(|b| b.low)
            .reduce(f64::min)
    }

    pub fn push(&mut self, bar: Bar) {
        self.bars.push(bar);
    }
}

impl std::ops::Index<usize> for BarSeries {
    type Output = Bar;
    fn index(&self, index: usize) -> &Self::Output {
        &self.bars[index]
    }
}

impl IntoIterator for BarSeries {
    type Item = Bar;
    type IntoIter = std::vec::IntoIter<Bar>;
    fn into_iter(self) -> Self::IntoIter {
        self.bars.into_iter()
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;
    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}
