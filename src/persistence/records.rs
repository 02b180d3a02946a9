use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Direction;
use crate::risk::trade_management::TradeAction;
use crate::strategies::signals::Signal;

/// Row written to the signals table when an order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default)]
    pub signal_quality: Option<u8>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub ticket: Option<u64>,
    pub created_at: DateTime<Utc>,
}

fn default_status() -> String {
    "pending".to_string()
}

impl SignalRecord {
    pub fn from_signal(
        signal: &Signal,
        stop_loss: f64,
        take_profit: f64,
        quality: Option<u8>,
        confidence: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let reason = format!(
            "{} trend, FVG {:.5}-{:.5} ({}), OB {} {:.5}-{:.5}",
            signal.trend,
            signal.fvg.low,
            signal.fvg.high,
            signal.fvg.timeframe,
            signal.order_block.id,
            signal.order_block.low,
            signal.order_block.high,
        );
        Self {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.price,
            stop_loss,
            take_profit,
            signal_quality: quality,
            confidence,
            reason,
            status: default_status(),
            ticket: None,
            created_at,
        }
    }
}

/// What happened to a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeEvent {
    Opened {
        direction: Direction,
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
        lot: f64,
    },
    Managed {
        #[serde(flatten)]
        action: TradeAction,
    },
    Closed {
        exit: f64,
        pnl: f64,
    },
}

/// Row written to the trade log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub event: String,
    pub ticket: u64,
    pub symbol: String,
    pub payload: TradeEvent,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(ticket: u64, symbol: &str, payload: TradeEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            event: "trade".to_string(),
            ticket,
            symbol: symbol.to_string(),
            payload,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_event_flattens_action() {
        let rec = TradeRecord::new(
            7,
            "EURUSD",
            TradeEvent::Managed {
                action: TradeAction::PartialClose { percent: 0.5 },
            },
            Utc::now(),
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["event"], "trade");
        assert_eq!(v["payload"]["kind"], "managed");
        assert_eq!(v["payload"]["action"], "partial_close");
        assert_eq!(v["payload"]["percent"], 0.5);
    }

    #[test]
    fn signal_record_defaults_to_pending() {
        let json = r#"{
            "symbol": "EURUSD", "direction": "buy", "entry_price": 1.1,
            "stop_loss": 1.09, "take_profit": 1.13,
            "created_at": "2024-01-15T12:00:00Z"
        }"#;
        let rec: SignalRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.status, "pending");
        assert!(rec.ticket.is_none());
    }
}
