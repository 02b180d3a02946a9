use serde::{Deserialize, Serialize};

use crate::core::AnalysisError;
use crate::models::BarSeries;

pub const FIB_RATIOS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// Five-level dealing range over a high/low window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibonacciRange {
    levels: [f64; 5],
}

impl FibonacciRange {
    /// `level(r) = low + r * (high - low)`. Inverted inputs are swapped so the
    /// levels stay non-decreasing in ratio.
    pub fn new(high: f64, low: f64) -> Result<Self, AnalysisError> {
        if !high.is_finite() || !low.is_finite() {
            return Err(AnalysisError::InvalidRange { high, low });
        }
        let (high, low) = if high < low { (low, high) } else { (high, low) };
        let span = high - low;
        let mut levels = FIB_RATIOS.map(|r| low + r * span);
        // pin the endpoints so level(1.0) is exactly the high
        levels[0] = low;
        levels[4] = high;
        Ok(Self { levels })
    }

    pub fn from_bars(bars: &BarSeries) -> Result<Self, AnalysisError> {
        match (bars.highs_max(), bars.lows_min()) {
            (Some(high), Some(low)) => Self::new(high, low),
            _ => Err(AnalysisError::EmptyWindow),
        }
    }

    /// Price at one of the five ratios; `None` for any other ratio.
    pub fn level(&self, ratio: f64) -> Option<f64> {
        FIB_RATIOS
            .iter()
            .position(|&r| r == ratio)
            .map(|i| self.levels[i])
    }

    pub fn levels(&self) -> [(f64, f64); 5] {
        let mut out = [(0.0, 0.0); 5];
        for (i, r) in FIB_RATIOS.iter().enumerate() {
            out[i] = (*r, self.levels[i]);
        }
        out
    }

    pub fn low(&self) -> f64 {
        self.levels[0]
    }

    pub fn high(&self) -> f64 {
        self.levels[4]
    }

    pub fn mid(&self) -> f64 {
        self.levels[2]
    }

    /// `[level(0.0), level(0.25)]`
    pub fn discount_zone(&self) -> (f64, f64) {
        (self.levels[0], self.levels[1])
    }

    /// `[level(0.5), level(0.75)]`
    pub fn premium_zone(&self) -> (f64, f64) {
        (self.levels[2], self.levels[3])
    }

    pub fn in_discount(&self, price: f64) -> bool {
        let (lo, hi) = self.discount_zone();
        lo <= price && price <= hi
    }

    pub fn in_premium(&self, price: f64) -> bool {
        let (lo, hi) = self.premium_zone();
        lo <= price && price <= hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_bars;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn levels_for_unit_range() {
        let fib = FibonacciRange::new(1.20, 1.00).unwrap();
        assert!(close(fib.level(0.5).unwrap(), 1.10));
        assert!(close(fib.level(0.25).unwrap(), 1.05));
        assert!(close(fib.level(0.75).unwrap(), 1.15));
        assert_eq!(fib.level(0.0), Some(1.00));
        assert_eq!(fib.level(1.0), Some(1.20));
        assert_eq!(fib.level(0.618), None);
    }

    #[test]
    fn identical_inputs_give_identical_levels() {
        let a = FibonacciRange::new(1.3371, 1.2113).unwrap();
        let b = FibonacciRange::new(1.3371, 1.2113).unwrap();
        for ((ra, pa), (rb, pb)) in a.levels().iter().zip(b.levels().iter()) {
            assert_eq!(ra.to_bits(), rb.to_bits());
            assert_eq!(pa.to_bits(), pb.to_bits());
        }
    }

    #[test]
    fn inverted_inputs_are_swapped() {
        let fib = FibonacciRange::new(1.00, 1.20).unwrap();
        assert_eq!(fib.low(), 1.00);
        assert_eq!(fib.high(), 1.20);
        let prices: Vec<f64> = fib.levels().iter().map(|(_, p)| *p).collect();
        assert!(prices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn zones() {
        let fib = FibonacciRange::new(1.20, 1.00).unwrap();
        assert!(fib.in_discount(1.02));
        assert!(!fib.in_discount(1.06));
        assert!(fib.in_premium(1.12));
        assert!(!fib.in_premium(1.18));
    }

    #[test]
    fn rejects_non_finite_and_empty_windows() {
        assert!(FibonacciRange::new(f64::NAN, 1.0).is_err());
        assert!(matches!(
            FibonacciRange::from_bars(&BarSeries::default()),
            Err(AnalysisError::EmptyWindow)
        ));
    }

    #[test]
    fn from_bars_uses_window_extremes() {
        let bars = make_bars(&[(1.05, 1.10, 1.00, 1.08), (1.08, 1.20, 1.04, 1.15)]);
        let fib = FibonacciRange::from_bars(&bars).unwrap();
        assert_eq!(fib.low(), 1.00);
        assert_eq!(fib.high(), 1.20);
    }
}
