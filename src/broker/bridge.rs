use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::{AccountSnapshot, Broker, OrderKind, OrderRequest, OrderResult, SymbolSpec};
use crate::models::{Bar, BarSeries, Direction, Timeframe};
use crate::risk::allocator::OpenPosition;
use crate::risk::trade_management::TradeAction;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TickResponse {
    bid: f64,
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct RawRate {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct SymbolInfoResponse {
    digits: u32,
    point: f64,
    #[serde(default)]
    trade_tick_value: f64,
    #[serde(default)]
    trade_tick_size: f64,
    volume_min: f64,
    volume_max: f64,
}

#[derive(Debug, Serialize)]
struct SendOrderBody<'a> {
    symbol: &'a str,
    action: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    sl: f64,
    tp: f64,
    comment: &'a str,
    magic: u64,
}

/// JSON-over-HTTP client for an MT5 terminal bridge.
pub struct BridgeBroker {
    client: Client,
    base_url: String,
    magic: u64,
}

impl BridgeBroker {
    pub fn new(base_url: &str, magic: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            magic,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .with_context(|| format!("Bridge request failed: GET {}", path))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Bridge error {} on {}: {}", status, path, body);
        }
        resp.json()
            .await
            .with_context(|| format!("Failed to parse bridge response for {}", path))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Bridge request failed: POST {}", path))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Bridge error {} on {}: {}", status, path, body);
        }
        resp.json()
            .await
            .with_context(|| format!("Failed to parse bridge response for {}", path))
    }
}

fn order_body(request: &OrderRequest) -> SendOrderBody<'_> {
    let action = match request.direction {
        Direction::Buy => "BUY",
        Direction::Sell => "SELL",
    };
    let (order_type, price) = match request.kind {
        OrderKind::Market => ("market", None),
        OrderKind::Limit { price } => ("limit", Some(price)),
    };
    SendOrderBody {
        symbol: &request.symbol,
        action,
        order_type,
        volume: request.volume,
        price,
        sl: request.sl,
        tp: request.tp,
        comment: &request.comment,
        magic: request.magic,
    }
}

/// Rows with an unknown timestamp or a malformed range are dropped.
fn rates_to_bars(rates: Vec<RawRate>) -> BarSeries {
    let mut bars: Vec<Bar> = Vec::with_capacity(rates.len());
    for r in rates {
        let Some(timestamp) = DateTime::from_timestamp(r.time, 0) else {
            warn!("Skipping rate with invalid time {}", r.time);
            continue;
        };
        let bar = Bar {
            timestamp,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.tick_volume,
        };
        if !bar.is_well_formed() {
            warn!("Skipping malformed bar at {}", timestamp);
            continue;
        }
        bars.push(bar);
    }
    bars.sort_by_key(|b| b.timestamp);
    BarSeries::new(bars)
}

fn spec_from_info(symbol: &str, info: &SymbolInfoResponse) -> SymbolSpec {
    let pip_size = SymbolSpec::pip_size_for(info.point, info.digits);
    // tick value scaled from tick size to pip size
    let pip_value = if info.trade_tick_size > 0.0 && info.trade_tick_value > 0.0 {
        info.trade_tick_value * pip_size / info.trade_tick_size
    } else {
        10.0
    };
    SymbolSpec {
        symbol: symbol.to_string(),
        digits: info.digits,
        pip_size,
        pip_value,
        min_lot: info.volume_min,
        max_lot: info.volume_max,
    }
}

#[async_trait]
impl Broker for BridgeBroker {
    async fn connect(&mut self) -> Result<AccountSnapshot> {
        let account: AccountSnapshot = self
            .post_json("/connect", &serde_json::json!({}))
            .await
            .context("Failed to connect to MT5 bridge")?;
        debug!("Bridge connected: {:?}", account);
        Ok(account)
    }

    async fn account(&mut self) -> Result<AccountSnapshot> {
        self.get_json("/account", &[]).await
    }

    async fn ensure_symbol(&mut self, symbol: &str) -> Result<()> {
        #[derive(Deserialize)]
        struct Selected {
            selected: bool,
        }
        let r: Selected = self
            .post_json("/symbol/select", &serde_json::json!({ "symbol": symbol }))
            .await?;
        if !r.selected {
            bail!("symbol {} not available on terminal", symbol);
        }
        Ok(())
    }

    async fn get_price(&mut self, symbol: &str) -> Result<f64> {
        let tick: TickResponse = self
            .get_json("/tick", &[("symbol", symbol.to_string())])
            .await?;
        if !(tick.bid.is_finite() && tick.ask.is_finite()) || tick.bid <= 0.0 || tick.ask <= 0.0 {
            bail!("invalid tick for {}: bid {} ask {}", symbol, tick.bid, tick.ask);
        }
        Ok((tick.bid + tick.ask) / 2.0)
    }

    async fn get_open_positions(&mut self) -> Result<Vec<OpenPosition>> {
        self.get_json("/positions", &[("magic", self.magic.to_string())])
            .await
    }

    async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        self.post_json("/order/send", &order_body(request))
            .await
            .with_context(|| format!("Failed to send order for {}", request.symbol))
    }

    async fn apply_action(&mut self, ticket: u64, action: &TradeAction) -> Result<OrderResult> {
        match *action {
            TradeAction::MoveSl { sl } | TradeAction::Trail { sl } => {
                self.post_json(
                    "/position/modify",
                    &serde_json::json!({ "ticket": ticket, "sl": sl }),
                )
                .await
            }
            TradeAction::PartialClose { percent } => {
                self.post_json(
                    "/position/close_partial",
                    &serde_json::json!({ "ticket": ticket, "percent": percent }),
                )
                .await
            }
        }
    }

    async fn fetch_bars(&mut self, symbol: &str, tf: Timeframe, limit: usize) -> Result<BarSeries> {
        let rates: Vec<RawRate> = self
            .get_json(
                "/rates",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", tf.as_str().to_string()),
                    ("count", limit.to_string()),
                ],
            )
            .await?;
        Ok(rates_to_bars(rates))
    }

    async fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec> {
        let info: SymbolInfoResponse = self
            .get_json("/symbol/info", &[("symbol", symbol.to_string())])
            .await?;
        Ok(spec_from_info(symbol, &info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_orders_carry_price() {
        let req = OrderRequest {
            symbol: "EURUSD".to_string(),
            direction: Direction::Sell,
            kind: OrderKind::Limit { price: 1.1 },
            volume: 0.2,
            sl: 1.11,
            tp: 1.07,
            comment: "ict".to_string(),
            magic: 7,
        };
        let v = serde_json::to_value(order_body(&req)).unwrap();
        assert_eq!(v["action"], "SELL");
        assert_eq!(v["type"], "limit");
        assert_eq!(v["price"], 1.1);

        let market = OrderRequest { kind: OrderKind::Market, ..req };
        let v = serde_json::to_value(order_body(&market)).unwrap();
        assert!(v.get("price").is_none());
    }

    #[test]
    fn malformed_rates_are_skipped() {
        let rates: Vec<RawRate> = serde_json::from_str(
            r#"[
                {"time": 1705320060, "open": 1.1, "high": 1.2, "low": 1.0, "close": 1.15, "tick_volume": 10},
                {"time": 1705320000, "open": 1.1, "high": 1.0, "low": 1.2, "close": 1.15},
                {"time": 1705320000, "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.05}
            ]"#,
        )
        .unwrap();
        let bars = rates_to_bars(rates);
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[1].volume, 10.0);
    }

    #[test]
    fn pip_value_scales_from_tick_value() {
        let info = SymbolInfoResponse {
            digits: 5,
            point: 0.00001,
            trade_tick_value: 1.0,
            trade_tick_size: 0.00001,
            volume_min: 0.01,
            volume_max: 50.0,
        };
        let spec = spec_from_info("EURUSD", &info);
        assert!((spec.pip_size - 0.0001).abs() < 1e-12);
        assert!((spec.pip_value - 10.0).abs() < 1e-9);
    }
}
