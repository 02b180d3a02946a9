use serde::{Deserialize, Serialize};

use crate::core::pd_arrays::OrderBlock;
use crate::models::Direction;

pub const DEFAULT_RR: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopTargets {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Manual levels win only when both are given. Otherwise the stop sits at the
/// far edge of the order block and the target `rr` risk units away.
pub fn calculate_sl_tp(
    direction: Direction,
    entry: f64,
    order_block: &OrderBlock,
    rr: f64,
    manual_sl: Option<f64>,
    manual_tp: Option<f64>,
) -> StopTargets {
    if let (Some(stop_loss), Some(take_profit)) = (manual_sl, manual_tp) {
        return StopTargets {
            stop_loss,
            take_profit,
        };
    }

    match direction {
        Direction::Buy => {
            let sl = order_block.low;
            StopTargets {
                stop_loss: sl,
                take_profit: entry + (entry - sl) * rr,
            }
        }
        Direction::Sell => {
            let sl = order_block.high;
            StopTargets {
                stop_loss: sl,
                take_profit: entry - (sl - entry) * rr,
            }
        }
    }
}
