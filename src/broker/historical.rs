use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backtesting::metrics::TradeOutcome;
use crate::broker::{AccountSnapshot, Broker, OrderKind, OrderRequest, OrderResult, SymbolSpec, RETCODE_DONE};
use crate::models::{Bar, BarSeries, Direction, Timeframe};
use crate::risk::allocator::OpenPosition;
use crate::risk::cooldown::{Clock, ManualClock};
use crate::risk::trade_management::TradeAction;

/// Retcodes used by the paper book for rejected requests.
pub const RETCODE_INVALID: u32 = 10013;
pub const RETCODE_NO_POSITION: u32 = 10036;

#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub risk: f64,
    pub opened_at: DateTime<Utc>,
}

/// A Broker that replays pre-loaded bars and fills orders on paper.
/// A shared clock controls which bars are visible: only bars with
/// timestamp <= now are returned, simulating a forward walk.
pub struct HistoricalBroker {
    data: HashMap<String, HashMap<Timeframe, Vec<Bar>>>,
    specs: HashMap<String, SymbolSpec>,
    clock: Arc<ManualClock>,
    pub balance: f64,
    pub positions: Vec<PaperPosition>,
    pub closed: Vec<TradeOutcome>,
    next_ticket: u64,
}

impl HistoricalBroker {
    pub fn new(clock: Arc<ManualClock>, balance: f64) -> Self {
        Self {
            data: HashMap::new(),
            specs: HashMap::new(),
            clock,
            balance,
            positions: Vec::new(),
            closed: Vec::new(),
            next_ticket: 1,
        }
    }

    /// Load bars for one symbol and timeframe. Bars must be sorted oldest-first.
    pub fn load(&mut self, symbol: &str, tf: Timeframe, bars: Vec<Bar>) {
        self.data.entry(symbol.to_string()).or_default().insert(tf, bars);
    }

    pub fn set_spec(&mut self, spec: SymbolSpec) {
        self.specs.insert(spec.symbol.clone(), spec);
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub fn set_time(&self, t: DateTime<Utc>) {
        self.clock.set(t);
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn earliest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .flat_map(|tfs| tfs.values())
            .filter_map(|v| v.first().map(|b| b.timestamp))
            .min()
    }

    pub fn latest_time(&self) -> Option<DateTime<Utc>> {
        self.data
            .values()
            .flat_map(|tfs| tfs.values())
            .filter_map(|v| v.last().map(|b| b.timestamp))
            .max()
    }

    /// Bars up to the clock, capped at `limit`.
    fn visible_bars(&self, symbol: &str, tf: Timeframe, limit: usize) -> BarSeries {
        let Some(all) = self.data.get(symbol).and_then(|m| m.get(&tf)) else {
            return BarSeries::default();
        };
        let now = self.clock.now();
        let end = match all.partition_point(|b| b.timestamp <= now) {
            0 => return BarSeries::default(),
            n => n,
        };
        let start = end.saturating_sub(limit);
        BarSeries::new(all[start..end].to_vec())
    }

    /// Latest visible close on the finest loaded timeframe.
    fn last_bar(&self, symbol: &str) -> Option<Bar> {
        let tfs = self.data.get(symbol)?;
        let mut keys: Vec<&Timeframe> = tfs.keys().collect();
        keys.sort();
        keys.into_iter()
            .find_map(|tf| self.visible_bars(symbol, *tf, 1).last().cloned())
    }

    fn spec_or_default(&self, symbol: &str) -> SymbolSpec {
        self.specs.get(symbol).cloned().unwrap_or_else(|| SymbolSpec {
            symbol: symbol.to_string(),
            digits: 5,
            pip_size: 0.0001,
            pip_value: 10.0,
            min_lot: 0.01,
            max_lot: 100.0,
        })
    }

    fn pnl(&self, pos: &PaperPosition, exit: f64) -> f64 {
        let spec = self.spec_or_default(&pos.symbol);
        let moved = match pos.direction {
            Direction::Buy => exit - pos.entry,
            Direction::Sell => pos.entry - exit,
        };
        moved / spec.pip_size * spec.pip_value * pos.volume
    }

    fn close_volume(&mut self, idx: usize, volume: f64, exit: f64) {
        let now = self.clock.now();
        let pnl = {
            let mut part = self.positions[idx].clone();
            part.volume = volume;
            self.pnl(&part, exit)
        };
        self.balance += pnl;
        let pos = &mut self.positions[idx];
        self.closed.push(TradeOutcome {
            ticket: pos.ticket,
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            entry: pos.entry,
            exit,
            volume,
            pnl,
            opened_at: pos.opened_at,
            closed_at: now,
        });
        pos.volume -= volume;
        if pos.volume <= 1e-9 {
            self.positions.remove(idx);
        }
    }

    /// Closes positions whose stop or target was touched by the latest bar.
    /// The stop wins when both are inside one bar.
    pub fn settle(&mut self) -> usize {
        let mut closed = 0;
        let mut i = 0;
        while i < self.positions.len() {
            let pos = &self.positions[i];
            let Some(bar) = self.last_bar(&pos.symbol) else {
                i += 1;
                continue;
            };
            let exit = match pos.direction {
                Direction::Buy if bar.low <= pos.sl => Some(pos.sl),
                Direction::Buy if bar.high >= pos.tp => Some(pos.tp),
                Direction::Sell if bar.high >= pos.sl => Some(pos.sl),
                Direction::Sell if bar.low <= pos.tp => Some(pos.tp),
                _ => None,
            };
            match exit {
                Some(price) => {
                    let volume = pos.volume;
                    self.close_volume(i, volume, price);
                    closed += 1;
                }
                None => i += 1,
            }
        }
        closed
    }

    /// Closes everything at the latest price; used at the end of a replay.
    pub fn close_all(&mut self) {
        while let Some(pos) = self.positions.first() {
            let exit = self.last_bar(&pos.symbol).map(|b| b.close).unwrap_or(pos.entry);
            let volume = pos.volume;
            self.close_volume(0, volume, exit);
        }
    }

    fn rejected(comment: &str) -> OrderResult {
        OrderResult {
            retcode: RETCODE_INVALID,
            ticket: None,
            comment: comment.to_string(),
        }
    }
}

#[async_trait]
impl Broker for HistoricalBroker {
    async fn connect(&mut self) -> Result<AccountSnapshot> {
        self.account().await
    }

    async fn account(&mut self) -> Result<AccountSnapshot> {
        let floating: f64 = self
            .positions
            .iter()
            .map(|p| {
                let price = self.last_bar(&p.symbol).map(|b| b.close).unwrap_or(p.entry);
                self.pnl(p, price)
            })
            .sum();
        Ok(AccountSnapshot {
            login: None,
            balance: self.balance,
            equity: self.balance + floating,
            currency: "USD".to_string(),
        })
    }

    async fn ensure_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.data.contains_key(symbol) {
            Ok(())
        } else {
            bail!("symbol {} not loaded", symbol)
        }
    }

    async fn get_price(&mut self, symbol: &str) -> Result<f64> {
        self.last_bar(symbol)
            .map(|b| b.close)
            .with_context(|| format!("no price data for {} at current time", symbol))
    }

    async fn get_open_positions(&mut self) -> Result<Vec<OpenPosition>> {
        let out = self
            .positions
            .iter()
            .map(|p| {
                let price = self.last_bar(&p.symbol).map(|b| b.close).unwrap_or(p.entry);
                OpenPosition {
                    ticket: p.ticket,
                    symbol: p.symbol.clone(),
                    volume: p.volume,
                    price: p.entry,
                    profit: self.pnl(p, price),
                    risk: p.risk,
                }
            })
            .collect();
        Ok(out)
    }

    async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        let Some(quote) = self.last_bar(&request.symbol).map(|b| b.close) else {
            return Ok(Self::rejected("no price"));
        };
        if request.volume <= 0.0 {
            return Ok(Self::rejected("invalid volume"));
        }
        // limits fill at their own price so the tracked entry matches the book
        let entry = match request.kind {
            OrderKind::Market => quote,
            OrderKind::Limit { price } => price,
        };

        let spec = self.spec_or_default(&request.symbol);
        let risk_money = (entry - request.sl).abs() / spec.pip_size * spec.pip_value * request.volume;
        let risk = if self.balance > 0.0 {
            risk_money / self.balance * 100.0
        } else {
            0.0
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.positions.push(PaperPosition {
            ticket,
            symbol: request.symbol.clone(),
            direction: request.direction,
            volume: request.volume,
            entry,
            sl: request.sl,
            tp: request.tp,
            risk,
            opened_at: self.clock.now(),
        });
        info!(
            "[PAPER] #{} {} {} {:.2} lots @ {:.5} | SL {:.5} | TP {:.5}",
            ticket, request.direction, request.symbol, request.volume, entry, request.sl, request.tp
        );

        Ok(OrderResult {
            retcode: RETCODE_DONE,
            ticket: Some(ticket),
            comment: "paper fill".to_string(),
        })
    }

    async fn apply_action(&mut self, ticket: u64, action: &TradeAction) -> Result<OrderResult> {
        let Some(idx) = self.positions.iter().position(|p| p.ticket == ticket) else {
            return Ok(OrderResult {
                retcode: RETCODE_NO_POSITION,
                ticket: Some(ticket),
                comment: "position not found".to_string(),
            });
        };

        match *action {
            TradeAction::MoveSl { sl } | TradeAction::Trail { sl } => {
                self.positions[idx].sl = sl;
            }
            TradeAction::PartialClose { percent } => {
                let symbol = self.positions[idx].symbol.clone();
                let Some(exit) = self.last_bar(&symbol).map(|b| b.close) else {
                    return Ok(Self::rejected("no price"));
                };
                let volume = (self.positions[idx].volume * percent * 100.0).round() / 100.0;
                self.close_volume(idx, volume, exit);
            }
        }

        Ok(OrderResult {
            retcode: RETCODE_DONE,
            ticket: Some(ticket),
            comment: action.to_string(),
        })
    }

    async fn fetch_bars(&mut self, symbol: &str, tf: Timeframe, limit: usize) -> Result<BarSeries> {
        Ok(self.visible_bars(symbol, tf, limit))
    }

    async fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec> {
        Ok(self.spec_or_default(symbol))
    }
}

/// Replay broker shared between the bot and the backtest driver, which
/// moves the clock and settles fills between ticks.
#[derive(Clone)]
pub struct SharedHistorical(pub Arc<tokio::sync::Mutex<HistoricalBroker>>);

impl SharedHistorical {
    pub fn new(broker: HistoricalBroker) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(broker)))
    }
}

#[async_trait]
impl Broker for SharedHistorical {
    async fn connect(&mut self) -> Result<AccountSnapshot> {
        self.0.lock().await.connect().await
    }

    async fn account(&mut self) -> Result<AccountSnapshot> {
        self.0.lock().await.account().await
    }

    async fn ensure_symbol(&mut self, symbol: &str) -> Result<()> {
        self.0.lock().await.ensure_symbol(symbol).await
    }

    async fn get_price(&mut self, symbol: &str) -> Result<f64> {
        self.0.lock().await.get_price(symbol).await
    }

    async fn get_open_positions(&mut self) -> Result<Vec<OpenPosition>> {
        self.0.lock().await.get_open_positions().await
    }

    async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        self.0.lock().await.place_order(request).await
    }

    async fn apply_action(&mut self, ticket: u64, action: &TradeAction) -> Result<OrderResult> {
        self.0.lock().await.apply_action(ticket, action).await
    }

    async fn fetch_bars(&mut self, symbol: &str, tf: Timeframe, limit: usize) -> Result<BarSeries> {
        self.0.lock().await.fetch_bars(symbol, tf, limit).await
    }

    async fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec> {
        self.0.lock().await.symbol_spec(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::make_bars;
    use chrono::Duration;

    fn broker() -> (HistoricalBroker, DateTime<Utc>) {
        let bars = make_bars(&[
            (1.1000, 1.1010, 1.0990, 1.1005),
            (1.1005, 1.1020, 1.1000, 1.1015),
            (1.1015, 1.1060, 1.1010, 1.1050),
            (1.1050, 1.1055, 1.0950, 1.0960),
        ]);
        let start = bars[0].timestamp;
        let clock = Arc::new(ManualClock::new(start));
        let mut b = HistoricalBroker::new(clock, 10_000.0);
        b.load("EURUSD", Timeframe::M1, bars.into_iter().collect());
        (b, start)
    }

    fn order(direction: Direction, sl: f64, tp: f64) -> OrderRequest {
        OrderRequest {
            symbol: "EURUSD".to_string(),
            direction,
            kind: OrderKind::Market,
            volume: 1.0,
            sl,
            tp,
            comment: "test".to_string(),
            magic: 1,
        }
    }

    #[tokio::test]
    async fn replay_hides_future_bars() {
        let (mut b, start) = broker();
        assert_eq!(b.fetch_bars("EURUSD", Timeframe::M1, 100).await.unwrap().len(), 1);
        b.set_time(start + Duration::minutes(2));
        assert_eq!(b.fetch_bars("EURUSD", Timeframe::M1, 100).await.unwrap().len(), 3);
        assert_eq!(b.fetch_bars("EURUSD", Timeframe::M1, 2).await.unwrap().len(), 2);
        assert!((b.get_price("EURUSD").await.unwrap() - 1.1050).abs() < 1e-9);
        assert!(b.get_price("GBPUSD").await.is_err());
        assert!(b.ensure_symbol("GBPUSD").await.is_err());
    }

    #[tokio::test]
    async fn take_profit_closes_with_gain() {
        let (mut b, start) = broker();
        let r = b.place_order(&order(Direction::Buy, 1.0980, 1.1040)).await.unwrap();
        assert!(r.is_done());
        assert_eq!(b.get_open_positions().await.unwrap().len(), 1);

        b.set_time(start + Duration::minutes(2));
        assert_eq!(b.settle(), 1);
        assert!(b.positions.is_empty());
        // 35 pips * $10 * 1 lot
        assert!((b.closed[0].pnl - 350.0).abs() < 1e-6);
        assert!((b.balance - 10_350.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn limit_order_fills_at_its_own_price() {
        let (mut b, _) = broker();
        let request = OrderRequest {
            kind: OrderKind::Limit { price: 1.0995 },
            ..order(Direction::Buy, 1.0980, 1.1040)
        };
        assert!(b.place_order(&request).await.unwrap().is_done());
        assert!((b.positions[0].entry - 1.0995).abs() < 1e-12);
        // 15 pips * $10 * 1 lot on 10k
        assert!((b.positions[0].risk - 1.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn actions_move_stop_and_close_half() {
        let (mut b, start) = broker();
        let ticket = b
            .place_order(&order(Direction::Buy, 1.0980, 1.1200))
            .await
            .unwrap()
            .ticket
            .unwrap();

        b.apply_action(ticket, &TradeAction::MoveSl { sl: 1.1005 }).await.unwrap();
        assert_eq!(b.positions[0].sl, 1.1005);

        b.set_time(start + Duration::minutes(1));
        let r = b
            .apply_action(ticket, &TradeAction::PartialClose { percent: 0.5 })
            .await
            .unwrap();
        assert!(r.is_done());
        assert!((b.positions[0].volume - 0.5).abs() < 1e-9);
        assert_eq!(b.closed.len(), 1);

        b.set_time(start + Duration::minutes(3));
        assert_eq!(b.settle(), 1);
        assert!(b.closed[1].pnl.abs() < 1e-6);

        let missing = b.apply_action(999, &TradeAction::Trail { sl: 1.0 }).await.unwrap();
        assert!(!missing.is_done());
    }
}
