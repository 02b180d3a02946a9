#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ict_signal_engine::broker::{
    AccountSnapshot, Broker, OrderRequest, OrderResult, SymbolSpec, RETCODE_DONE,
};
use ict_signal_engine::config::Config;
use ict_signal_engine::models::{Bar, BarSeries, Timeframe};
use ict_signal_engine::persistence::{SignalRecord, SignalStore, TradeRecord};
use ict_signal_engine::risk::allocator::OpenPosition;
use ict_signal_engine::risk::trade_management::TradeAction;

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Create bars from (open, high, low, close) tuples with auto-incrementing 15m timestamps.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> BarSeries {
    let base = at("2024-01-15T06:00:00Z");
    let bars: Vec<Bar> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar {
            timestamp: base + Duration::minutes(15 * i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();
    BarSeries::new(bars)
}

/// Bullish structure with a swept pair of equal lows, a discount fib band
/// [1.05, 1.10], a bullish FVG at [1.064, 1.076] and a bullish order block
/// at [1.06, 1.08]. With price at 1.07 a buy signal fires.
pub fn signal_bars() -> BarSeries {
    make_bars(&[
        (1.020, 1.030, 1.010, 1.015),
        (1.070, 1.080, 1.060, 1.062),
        (1.062, 1.064, 1.000, 1.060),
        (1.060, 1.090, 1.058, 1.088),
        (1.088, 1.100, 1.076, 1.095),
        (1.095, 1.120, 1.090, 1.115),
        (1.115, 1.135, 1.110, 1.130),
        (1.130, 1.150, 1.125, 1.128),
        (1.128, 1.130, 1.100, 1.105),
        (1.105, 1.108, 1.085, 1.087),
        (1.087, 1.090, 1.075, 1.080),
        (1.080, 1.110, 1.079, 1.105),
        (1.105, 1.140, 1.100, 1.135),
        (1.135, 1.170, 1.130, 1.165),
        (1.165, 1.200, 1.160, 1.190),
        (1.190, 1.192, 1.140, 1.145),
        (1.145, 1.148, 1.100, 1.105),
        (1.105, 1.108, 1.0752, 1.080),
        (1.080, 1.095, 1.078, 1.090),
        (1.090, 1.100, 1.085, 1.095),
        (1.095, 1.105, 1.090, 1.100),
    ])
}

/// Config tuned for the short fixture series.
pub fn test_config(symbols: &[&str]) -> Config {
    Config {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        smt_pairs: Vec::new(),
        swing_lookback: 3,
        min_bars: 10,
        equal_tolerance: 0.0003,
        poll_interval_secs: 1,
        log_level: "ERROR".to_string(),
        ..Config::default()
    }
}

#[derive(Debug)]
pub struct MockState {
    pub price: f64,
    pub bars: BarSeries,
    /// Per-symbol overrides of `bars`.
    pub symbol_bars: HashMap<String, BarSeries>,
    /// Symbols whose bar requests fail.
    pub no_data: HashSet<String>,
    /// Every symbol bars were requested for, in order.
    pub fetched: Vec<String>,
    pub balance: f64,
    pub accepted: HashSet<String>,
    pub positions: Vec<OpenPosition>,
    pub orders: Vec<OrderRequest>,
    pub actions: Vec<(u64, TradeAction)>,
    pub reject_orders: bool,
    next_ticket: u64,
}

/// Broker returning the same canned bars for every timeframe, and for every
/// symbol without an override.
/// Filled orders show up as open positions until `close_all` is called.
#[derive(Clone)]
pub struct MockBroker {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new(accepted: &[&str], bars: BarSeries, price: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                price,
                bars,
                symbol_bars: HashMap::new(),
                no_data: HashSet::new(),
                fetched: Vec::new(),
                balance: 20_000.0,
                accepted: accepted.iter().map(|s| s.to_string()).collect(),
                positions: Vec::new(),
                orders: Vec::new(),
                actions: Vec::new(),
                reject_orders: false,
                next_ticket: 1000,
            })),
        }
    }

    pub fn set_price(&self, price: f64) {
        self.state.lock().unwrap().price = price;
    }

    pub fn set_bars(&self, symbol: &str, bars: BarSeries) {
        self.state.lock().unwrap().symbol_bars.insert(symbol.to_string(), bars);
    }

    pub fn fail_bars(&self, symbol: &str) {
        self.state.lock().unwrap().no_data.insert(symbol.to_string());
    }

    pub fn add_position(&self, ticket: u64, symbol: &str, risk: f64) {
        self.state.lock().unwrap().positions.push(OpenPosition {
            ticket,
            symbol: symbol.to_string(),
            volume: 0.1,
            price: 1.0,
            profit: 0.0,
            risk,
        });
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn close_all(&self) {
        self.state.lock().unwrap().positions.clear();
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn actions(&self) -> Vec<(u64, TradeAction)> {
        self.state.lock().unwrap().actions.clone()
    }
}

fn done(ticket: Option<u64>) -> OrderResult {
    OrderResult {
        retcode: RETCODE_DONE,
        ticket,
        comment: "Request completed".to_string(),
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&mut self) -> Result<AccountSnapshot> {
        self.account().await
    }

    async fn account(&mut self) -> Result<AccountSnapshot> {
        let s = self.state.lock().unwrap();
        Ok(AccountSnapshot {
            login: Some(42),
            balance: s.balance,
            equity: s.balance,
            currency: "USD".to_string(),
        })
    }

    async fn ensure_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.state.lock().unwrap().accepted.contains(symbol) {
            Ok(())
        } else {
            bail!("unknown symbol {}", symbol)
        }
    }

    async fn get_price(&mut self, _symbol: &str) -> Result<f64> {
        Ok(self.state.lock().unwrap().price)
    }

    async fn get_open_positions(&mut self) -> Result<Vec<OpenPosition>> {
        Ok(self.state.lock().unwrap().positions.clone())
    }

    async fn place_order(&mut self, request: &OrderRequest) -> Result<OrderResult> {
        let mut s = self.state.lock().unwrap();
        s.orders.push(request.clone());
        if s.reject_orders {
            return Ok(OrderResult {
                retcode: 10019,
                ticket: None,
                comment: "No money".to_string(),
            });
        }
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        let price = s.price;
        s.positions.push(OpenPosition {
            ticket,
            symbol: request.symbol.clone(),
            volume: request.volume,
            price,
            profit: 0.0,
            risk: 0.75,
        });
        Ok(done(Some(ticket)))
    }

    async fn apply_action(&mut self, ticket: u64, action: &TradeAction) -> Result<OrderResult> {
        self.state.lock().unwrap().actions.push((ticket, *action));
        Ok(done(Some(ticket)))
    }

    async fn fetch_bars(&mut self, symbol: &str, _tf: Timeframe, limit: usize) -> Result<BarSeries> {
        let mut s = self.state.lock().unwrap();
        s.fetched.push(symbol.to_string());
        if s.no_data.contains(symbol) {
            bail!("no bars for {}", symbol);
        }
        let bars = s.symbol_bars.get(symbol).unwrap_or(&s.bars);
        Ok(bars.tail(limit))
    }

    async fn symbol_spec(&mut self, symbol: &str) -> Result<SymbolSpec> {
        Ok(SymbolSpec {
            symbol: symbol.to_string(),
            digits: 5,
            pip_size: 0.0001,
            pip_value: 10.0,
            min_lot: 0.01,
            max_lot: 50.0,
        })
    }
}

/// Keeps everything it is asked to persist.
#[derive(Default)]
pub struct RecordingStore {
    pub signals: Mutex<Vec<SignalRecord>>,
    pub trades: Mutex<Vec<TradeRecord>>,
}

#[async_trait]
impl SignalStore for RecordingStore {
    async fn persist_signal(&self, record: &SignalRecord) -> Result<()> {
        self.signals.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn persist_trade(&self, record: &TradeRecord) -> Result<()> {
        self.trades.lock().unwrap().push(record.clone());
        Ok(())
    }
}
