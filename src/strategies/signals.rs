use serde::{Deserialize, Serialize};

use crate::core::pd_arrays::{FairValueGap, OrderBlock};
use crate::models::{Direction, FibZone, Trend};

/// Candidate trade produced by the entry gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub trend: Trend,
    pub price: f64,
    pub fvg: FairValueGap,
    pub order_block: OrderBlock,
    pub fib_zone: FibZone,
}

impl Signal {
    pub fn fvg_width(&self) -> f64 {
        self.fvg.high - self.fvg.low
    }

    pub fn order_block_width(&self) -> f64 {
        self.order_block.high - self.order_block.low
    }
}
