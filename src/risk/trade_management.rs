use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStage {
    Initial = 0,
    Breakeven = 1,
    Partial = 2,
    Trailing = 3,
}

impl fmt::Display for TradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStage::Initial => write!(f, "initial"),
            TradeStage::Breakeven => write!(f, "breakeven"),
            TradeStage::Partial => write!(f, "partial"),
            TradeStage::Trailing => write!(f, "trailing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TradeAction {
    MoveSl { sl: f64 },
    PartialClose { percent: f64 },
    Trail { sl: f64 },
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::MoveSl { sl } => write!(f, "move SL to {:.5}", sl),
            TradeAction::PartialClose { percent } => write!(f, "close {:.0}%", percent * 100.0),
            TradeAction::Trail { sl } => write!(f, "trail SL to {:.5}", sl),
        }
    }
}

/// A live trade owned by the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub initial_stop: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lot: f64,
    pub stage: TradeStage,
}

impl Trade {
    pub fn new(
        ticket: u64,
        symbol: &str,
        direction: Direction,
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
        lot: f64,
    ) -> Self {
        Self {
            ticket,
            symbol: symbol.to_string(),
            direction,
            entry,
            initial_stop: stop_loss,
            stop_loss,
            take_profit,
            lot,
            stage: TradeStage::Initial,
        }
    }

    /// One risk unit, always measured from the initial stop.
    pub fn r(&self) -> f64 {
        (self.entry - self.initial_stop).abs()
    }

    /// Distance price has moved in the trade's favour; negative when against.
    pub fn excursion(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Buy => price - self.entry,
            Direction::Sell => self.entry - price,
        }
    }

    /// Advances the staged exit at most one step and returns the broker action.
    ///
    /// Initial: at 1R move the stop to entry. Breakeven: at 2R close half.
    /// Partial and Trailing: ratchet the stop to one R behind price on every call.
    pub fn manage(&mut self, price: f64) -> Option<TradeAction> {
        let r = self.r();
        if r <= 0.0 || !r.is_finite() || !price.is_finite() {
            return None;
        }
        let excursion = self.excursion(price);

        match self.stage {
            TradeStage::Initial => {
                if excursion >= r {
                    self.stop_loss = self.entry;
                    self.stage = TradeStage::Breakeven;
                    return Some(TradeAction::MoveSl { sl: self.stop_loss });
                }
                None
            }
            TradeStage::Breakeven => {
                if excursion >= 2.0 * r {
                    self.stage = TradeStage::Partial;
                    return Some(TradeAction::PartialClose { percent: 0.5 });
                }
                None
            }
            TradeStage::Partial | TradeStage::Trailing => {
                self.stop_loss = match self.direction {
                    Direction::Buy => self.stop_loss.max(price - r),
                    Direction::Sell => self.stop_loss.min(price + r),
                };
                self.stage = TradeStage::Trailing;
                Some(TradeAction::Trail { sl: self.stop_loss })
            }
        }
    }

    /// Books an action the broker has confirmed. A partial close leaves the
    /// remaining volume, on the same 0.01 lot step the broker closes in.
    pub fn confirm(&mut self, action: &TradeAction) {
        if let TradeAction::PartialClose { percent } = *action {
            let closed = (self.lot * percent * 100.0).round() / 100.0;
            self.lot = ((self.lot - closed) * 100.0).round() / 100.0;
        }
    }
}
