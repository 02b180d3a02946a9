use tracing::debug;

use crate::core::liquidity::LiquidityZones;
use crate::core::smt::{detect_smt, CorrelatedPair};
use crate::models::Direction;

/// A buy needs price under the first leg of some EQL pair (sell-side swept),
/// a sell needs price over the first leg of some EQH pair.
pub fn liquidity_taken(price: f64, liquidity: &LiquidityZones, direction: Direction) -> bool {
    match direction {
        Direction::Buy => liquidity.eql.iter().any(|&(first, _)| price < first),
        Direction::Sell => liquidity.eqh.iter().any(|&(first, _)| price > first),
    }
}

/// Permissive without correlated data or without divergence. A detected
/// divergence must agree with the direction.
pub fn smt_confirmed(direction: Direction, correlated: Option<&CorrelatedPair>) -> bool {
    let Some(pair) = correlated else {
        return true;
    };
    match detect_smt(&pair.primary, &pair.correlated) {
        None => true,
        Some(bias) => {
            let agrees = bias.to_direction() == direction;
            if !agrees {
                debug!(
                    "[{}] SMT {} divergence against {} signal",
                    pair.symbol, bias, direction
                );
            }
            agrees
        }
    }
}
