pub mod bridge;
pub mod historical;
pub mod symbols;

pub use bridge::BridgeBroker;
pub use historical::{HistoricalBroker, SharedHistorical};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::pd_arrays::FairValueGap;
use crate::models::{BarSeries, Direction, Timeframe};
use crate::risk::allocator::OpenPosition;
use crate::risk::trade_management::TradeAction;

/// MT5 `TRADE_RETCODE_DONE`.
pub const RETCODE_DONE: u32 = 10009;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(default)]
    pub login: Option<u64>,
    pub balance: f64,
    #[serde(default)]
    pub equity: f64,
    #[serde(default)]
    pub currency: String,
}

/// Per-instrument trading parameters. `pip_value` is the account-currency
/// value of one pip for one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub digits: u32,
    pub pip_size: f64,
    pub pip_value: f64,
    pub min_lot: f64,
    pub max_lot: f64,
}

impl SymbolSpec {
    /// Five- and three-digit quotes carry a fractional pip.
    pub fn pip_size_for(point: f64, digits: u32) -> f64 {
        if digits == 3 || digits == 5 {
            point * 10.0
        } else {
            point
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    #[default]
    Auto,
    Market,
    Limit,
}

impl OrderMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(OrderMode::Auto),
            "market" => Some(OrderMode::Market),
            "limit" => Some(OrderMode::Limit),
            _ => None,
        }
    }
}

/// Market when price is already inside the FVG, otherwise a limit at its midpoint.
pub fn choose_order_kind(mode: OrderMode, price: f64, fvg: &FairValueGap) -> OrderKind {
    let mid = (fvg.low + fvg.high) / 2.0;
    match mode {
        OrderMode::Market => OrderKind::Market,
        OrderMode::Limit => OrderKind::Limit { price: mid },
        OrderMode::Auto => {
            if fvg.low <= price && price <= fvg.high {
                OrderKind::Market
            } else {
                OrderKind::Limit { price: mid }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub kind: OrderKind,
    pub volume: f64,
    pub sl: f64,
    pub tp: f64,
    pub comment: String,
    pub magic: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: u32,
    #[serde(default, alias = "order")]
    pub ticket: Option<u64>,
    #[serde(default)]
    pub comment: String,
}

impl OrderResult {
    pub fn is_done(&self) -> bool {
        self.retcode == RETCODE_DONE
    }
}

/// Price feed and order routing.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&mut self) -> Result<AccountSnapshot>;
    /// Current balance and equity.
    async fn account(&mut self) -> Result<AccountSnapshot>;
    async fn ensure_symbol(&mut self, symbol: &str) -> Result<()>;
    /// Mid price.
    async fn get_price(&mut self, symbol: &str) -> Result<f64>;
    async fn get_open_positions(&mut self) -> Result<Vec<OpenPosition>>;
    async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult>;
    async fn apply_action(&mut self, ticket: u64, action: &TradeAction) -> Result<OrderResult>;
    async fn fetch_bars(&mut self, symbol: &str, tf: Timeframe, limit: usize) -> Result<BarSeries>;
    async fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bias;

    fn gap() -> FairValueGap {
        FairValueGap {
            kind: Bias::Bullish,
            low: 1.10,
            high: 1.12,
            index: 5,
            timeframe: Timeframe::M15,
        }
    }

    #[test]
    fn auto_routing() {
        assert_eq!(choose_order_kind(OrderMode::Auto, 1.11, &gap()), OrderKind::Market);
        match choose_order_kind(OrderMode::Auto, 1.13, &gap()) {
            OrderKind::Limit { price } => assert!((price - 1.11).abs() < 1e-9),
            other => panic!("expected limit, got {:?}", other),
        }
        assert_eq!(choose_order_kind(OrderMode::Market, 1.20, &gap()), OrderKind::Market);
    }

    #[test]
    fn order_result_accepts_mt5_field_names() {
        let r: OrderResult =
            serde_json::from_str(r#"{"retcode":10009,"order":42,"comment":"Request completed"}"#)
                .unwrap();
        assert!(r.is_done());
        assert_eq!(r.ticket, Some(42));
    }

    #[test]
    fn pip_size_from_digits() {
        assert!((SymbolSpec::pip_size_for(0.00001, 5) - 0.0001).abs() < 1e-12);
        assert!((SymbolSpec::pip_size_for(0.001, 3) - 0.01).abs() < 1e-12);
        assert_eq!(SymbolSpec::pip_size_for(0.01, 2), 0.01);
    }
}
