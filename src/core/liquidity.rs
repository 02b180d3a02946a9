use serde::{Deserialize, Serialize};

use crate::core::swings::SwingPoint;
use crate::models::SwingKind;

/// Price distance under which two successive swing extremes count as equal.
pub const DEFAULT_EQUAL_TOLERANCE: f64 = 0.0003;

/// Resting liquidity above equal highs (EQH) and below equal lows (EQL).
/// Each pair is (earlier price, later price); overlapping pairs are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityZones {
    pub eqh: Vec<(f64, f64)>,
    pub eql: Vec<(f64, f64)>,
}

impl LiquidityZones {
    pub fn is_empty(&self) -> bool {
        self.eqh.is_empty() && self.eql.is_empty()
    }
}

/// Compares each swing only with the previous swing of the same kind.
pub fn detect_liquidity_zones(swings: &[SwingPoint], tolerance: f64) -> LiquidityZones {
    let mut zones = LiquidityZones::default();
    let mut last_high: Option<f64> = None;
    let mut last_low: Option<f64> = None;

    for s in swings {
        let (last, out) = match s.kind {
            SwingKind::High => (&mut last_high, &mut zones.eqh),
            SwingKind::Low => (&mut last_low, &mut zones.eql),
        };
        if let Some(prev) = *last {
            if (prev - s.price).abs() <= tolerance {
                out.push((prev, s.price));
            }
        }
        *last = Some(s.price);
    }

    zones
}
