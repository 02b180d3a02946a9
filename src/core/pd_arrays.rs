use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::structure::BosEvent;
use crate::models::{BarSeries, Bias, Timeframe};

/// Anything with a price band and a position in its bar series.
pub trait PriceZone {
    fn low(&self) -> f64;
    fn high(&self) -> f64;
    fn index(&self) -> usize;

    fn width(&self) -> f64 {
        self.high() - self.low()
    }

    fn contains(&self, price: f64) -> bool {
        self.low() <= price && price <= self.high()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub kind: Bias,
    pub low: f64,
    pub high: f64,
    /// Position of the third bar of the triple.
    pub index: usize,
    pub timeframe: Timeframe,
}

/// Stable across ticks: unix seconds of the bar the block was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBlockId(pub i64);

impl fmt::Display for OrderBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub id: OrderBlockId,
    pub kind: Bias,
    pub low: f64,
    pub high: f64,
    pub index: usize,
    pub timeframe: Timeframe,
}

impl PriceZone for FairValueGap {
    fn low(&self) -> f64 {
        self.low
    }
    fn high(&self) -> f64 {
        self.high
    }
    fn index(&self) -> usize {
        self.index
    }
}

impl PriceZone for OrderBlock {
    fn low(&self) -> f64 {
        self.low
    }
    fn high(&self) -> f64 {
        self.high
    }
    fn index(&self) -> usize {
        self.index
    }
}

impl OrderBlock {
    /// The FVG band lies entirely inside this block.
    pub fn encloses(&self, fvg: &FairValueGap) -> bool {
        self.low <= fvg.low && fvg.high <= self.high
    }
}

/// Three-bar imbalance scan. A triple with any malformed bar is skipped and
/// the scan moves on.
pub fn detect_fvgs(bars: &BarSeries, timeframe: Timeframe) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    let b = bars.as_slice();
    if b.len() < 3 {
        return gaps;
    }

    for i in 2..b.len() {
        let (c1, c2, c3) = (&b[i - 2], &b[i - 1], &b[i]);
        if !(c1.is_well_formed() && c2.is_well_formed() && c3.is_well_formed()) {
            continue;
        }

        if c1.high < c3.low {
            gaps.push(FairValueGap {
                kind: Bias::Bullish,
                low: c1.high,
                high: c3.low,
                index: i,
                timeframe,
            });
        } else if c1.low > c3.high {
            gaps.push(FairValueGap {
                kind: Bias::Bearish,
                low: c3.high,
                high: c1.low,
                index: i,
                timeframe,
            });
        }
    }

    gaps
}

/// Structural mode: the bar right before each breaking bar.
pub fn detect_order_blocks_structural(
    bars: &BarSeries,
    bos_events: &[BosEvent],
    timeframe: Timeframe,
) -> Vec<OrderBlock> {
    let mut blocks = Vec::new();

    for event in bos_events {
        let k = event.index;
        if k == 0 || k >= bars.len() {
            continue;
        }
        let (prev, breaking) = (&bars[k - 1], &bars[k]);
        if !prev.is_well_formed() || !breaking.is_well_formed() {
            continue;
        }

        let kind = if breaking.close > breaking.open {
            Bias::Bullish
        } else {
            Bias::Bearish
        };
        blocks.push(OrderBlock {
            id: OrderBlockId(prev.timestamp.timestamp()),
            kind,
            low: prev.low,
            high: prev.high,
            index: k - 1,
            timeframe,
        });
    }

    blocks
}

/// Local-extremum mode over raw bars, `2 <= i < n - 2`. A strict local high
/// gives a bearish block, a strict local low a bullish one.
///
/// `index` is the extremum bar `i`. The range and the id come from bar
/// `i - 1`, so the id stays put when the same block is seen again.
pub fn detect_order_blocks_local(bars: &BarSeries, timeframe: Timeframe) -> Vec<OrderBlock> {
    let mut blocks = Vec::new();
    let b = bars.as_slice();
    if b.len() < 5 {
        return blocks;
    }

    for i in 2..b.len() - 2 {
        let (prev, cur, next) = (&b[i - 1], &b[i], &b[i + 1]);
        if !(prev.is_well_formed() && cur.is_well_formed() && next.is_well_formed()) {
            continue;
        }

        // both branches take the previous bar's range
        let make = |kind| OrderBlock {
            id: OrderBlockId(prev.timestamp.timestamp()),
            kind,
            low: prev.low,
            high: prev.high,
            index: i,
            timeframe,
        };

        if cur.high > prev.high && cur.high > next.high {
            blocks.push(make(Bias::Bearish));
        }
        if cur.low < prev.low && cur.low < next.low {
            blocks.push(make(Bias::Bullish));
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::structure::detect_bos;
    use crate::core::swings::find_swings;
    use crate::test_helpers::{make_bars, make_bullish_waves};

    #[test]
    fn bullish_gap_bounds() {
        let bars = make_bars(&[
            (0.98, 1.00, 0.97, 0.99),
            (1.00, 1.25, 0.99, 1.22),
            (1.22, 1.30, 1.20, 1.28),
        ]);
        let gaps = detect_fvgs(&bars, Timeframe::M15);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, Bias::Bullish);
        assert_eq!(gaps[0].low, 1.00);
        assert_eq!(gaps[0].high, 1.20);
        assert_eq!(gaps[0].index, 2);
        assert_eq!(gaps[0].timeframe, Timeframe::M15);
    }

    #[test]
    fn bearish_gap_bounds() {
        let bars = make_bars(&[
            (1.30, 1.31, 1.25, 1.26),
            (1.26, 1.27, 1.10, 1.12),
            (1.12, 1.20, 1.05, 1.08),
        ]);
        let gaps = detect_fvgs(&bars, Timeframe::M15);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, Bias::Bearish);
        assert_eq!(gaps[0].low, 1.20);
        assert_eq!(gaps[0].high, 1.25);
        assert!(gaps[0].high > gaps[0].low);
    }

    #[test]
    fn malformed_bar_skips_only_its_triples() {
        let bars = make_bars(&[
            (0.98, 1.00, 0.97, 0.99),
            (1.00, f64::NAN, 0.99, 1.22),
            (1.22, 1.30, 1.20, 1.28),
            (1.28, 1.31, 1.27, 1.30),
            (1.30, 1.40, 1.35, 1.38),
        ]);
        let gaps = detect_fvgs(&bars, Timeframe::M15);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].index, 4);
        assert_eq!(gaps[0].low, 1.30);
        assert_eq!(gaps[0].high, 1.35);
    }

    #[test]
    fn structural_blocks_come_from_bar_before_break() {
        let bars = make_bullish_waves(3, 1.0);
        let bos = detect_bos(&find_swings(&bars, 3));
        assert!(!bos.is_empty());
        let blocks = detect_order_blocks_structural(&bars, &bos, Timeframe::H1);
        assert_eq!(blocks.len(), bos.len());
        for (block, event) in blocks.iter().zip(&bos) {
            assert_eq!(block.index, event.index - 1);
            assert_eq!(block.high, bars[event.index - 1].high);
            assert_eq!(block.id, OrderBlockId(bars[event.index - 1].timestamp.timestamp()));
        }
    }

    #[test]
    fn local_blocks_sit_on_the_extreme_with_previous_bar_range() {
        let bars = make_bars(&[
            (1.00, 1.01, 0.99, 1.00),
            (1.00, 1.02, 0.99, 1.01),
            (1.01, 1.03, 1.00, 1.02),
            (1.02, 1.08, 1.01, 1.06),
            (1.05, 1.05, 0.95, 0.97),
            (0.97, 1.00, 0.96, 0.99),
            (0.99, 1.01, 0.98, 1.00),
        ]);
        let blocks = detect_order_blocks_local(&bars, Timeframe::H1);
        let bearish: Vec<_> = blocks.iter().filter(|b| b.kind == Bias::Bearish).collect();
        let bullish: Vec<_> = blocks.iter().filter(|b| b.kind == Bias::Bullish).collect();

        assert_eq!(bearish.len(), 1);
        assert_eq!(bearish[0].index, 3);
        assert_eq!((bearish[0].low, bearish[0].high), (1.00, 1.03));
        assert_eq!(bearish[0].id, OrderBlockId(bars[2].timestamp.timestamp()));

        assert_eq!(bullish.len(), 1);
        assert_eq!(bullish[0].index, 4);
        assert_eq!((bullish[0].low, bullish[0].high), (1.01, 1.08));
        assert_eq!(bullish[0].id, OrderBlockId(bars[3].timestamp.timestamp()));
    }

    #[test]
    fn enclosure_check() {
        let ob = OrderBlock {
            id: OrderBlockId(1),
            kind: Bias::Bullish,
            low: 1.00,
            high: 1.10,
            index: 0,
            timeframe: Timeframe::H1,
        };
        let inside = FairValueGap {
            kind: Bias::Bullish,
            low: 1.02,
            high: 1.08,
            index: 3,
            timeframe: Timeframe::M15,
        };
        let poking_out = FairValueGap { high: 1.11, ..inside };
        assert!(ob.encloses(&inside));
        assert!(!ob.encloses(&poking_out));
        assert!((inside.width() - 0.06).abs() < 1e-9);
    }
}
