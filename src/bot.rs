use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::symbols::{canonical_name, resolve_symbol};
use crate::broker::{choose_order_kind, Broker, OrderKind, OrderRequest};
use crate::config::Config;
use crate::core::sessions::SessionManager;
use crate::core::smt::{CorrelatedPair, SmtSnapshot};
use crate::core::AnalysisError;
use crate::models::{BarSeries, Timeframe};
use crate::news::{news_allows_trade, NewsGate};
use crate::persistence::{spawn_signal, spawn_trade, SignalRecord, SignalStore, TradeEvent, TradeRecord};
use crate::risk::allocator::{size_lot, stop_distance_pips, OpenPosition, PortfolioAllocator};
use crate::risk::cooldown::{Clock, CooldownStore};
use crate::risk::sl_tp::calculate_sl_tp;
use crate::risk::trade_management::Trade;
use crate::strategies::analysis::TopDownAnalyzer;
use crate::strategies::entry::EntryModel;
use crate::strategies::filters::{liquidity_taken, smt_confirmed};
use crate::strategies::quality::{daily_trend, ProbabilisticScorer, RuleQualityScorer, ScoringModel};

/// `base * 2^(failures - 1)`, capped.
pub fn backoff_delay(base_secs: u64, cap_secs: u64, failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    let secs = base_secs.saturating_mul(1u64 << shift).min(cap_secs.max(base_secs));
    Duration::from_secs(secs)
}

/// What one pass over the symbols did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub orders: usize,
    pub actions: usize,
    pub skipped: usize,
    /// The running flag dropped mid-pass.
    pub interrupted: bool,
}

/// A configured symbol and the name the broker knows it by.
#[derive(Debug, Clone)]
struct TrackedSymbol {
    name: String,
    broker_name: String,
}

pub struct IctBot {
    config: Config,
    broker: Box<dyn Broker>,
    store: Arc<dyn SignalStore>,
    news: Box<dyn NewsGate>,
    clock: Arc<dyn Clock>,
    session: SessionManager,
    analyzer: TopDownAnalyzer,
    entry: EntryModel,
    rule_scorer: RuleQualityScorer,
    ml_scorer: ProbabilisticScorer,
    allocator: PortfolioAllocator,
    cooldown: CooldownStore,
    trades: HashMap<u64, Trade>,
    symbols: Vec<TrackedSymbol>,
    signals: usize,
}

impl IctBot {
    pub fn new(
        config: Config,
        broker: Box<dyn Broker>,
        store: Arc<dyn SignalStore>,
        news: Box<dyn NewsGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = SessionManager::new(config.timezone(), config.sessions.clone());
        let analyzer = TopDownAnalyzer::new(config.analyzer_settings());
        let entry = EntryModel::new(config.match_policy);
        let rule_scorer = RuleQualityScorer {
            pass_score: config.rule_pass_score,
            ..RuleQualityScorer::default()
        };
        let ml_scorer = ProbabilisticScorer::new(None, config.ml_threshold);
        let allocator = PortfolioAllocator::new(config.risk_limits.clone());
        let cooldown = CooldownStore::new(clock.clone());

        Self {
            config,
            broker,
            store,
            news,
            clock,
            session,
            analyzer,
            entry,
            rule_scorer,
            ml_scorer,
            allocator,
            cooldown,
            trades: HashMap::new(),
            symbols: Vec::new(),
            signals: 0,
        }
    }

    pub fn with_model(mut self, model: Box<dyn ScoringModel>) -> Self {
        self.ml_scorer = ProbabilisticScorer::new(Some(model), self.config.ml_threshold);
        self
    }

    /// Hands an already-open trade to the lifecycle manager.
    pub fn track(&mut self, trade: Trade) {
        self.trades.insert(trade.ticket, trade);
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    pub fn signal_count(&self) -> usize {
        self.signals
    }

    /// Connects and resolves every configured symbol. Fails when the broker
    /// is unreachable or no symbol resolves.
    pub async fn start(&mut self) -> Result<()> {
        info!("{}", "=".repeat(60));
        info!("ICT signal engine starting up");

        let account = self.broker.connect().await.context("Broker connection failed")?;
        info!(
            "Account: {} | Balance: {:.2} {} | Equity: {:.2}",
            account.login.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
            account.balance,
            account.currency,
            account.equity
        );

        self.symbols.clear();
        for name in self.config.symbols.clone() {
            match resolve_symbol(self.broker.as_mut(), &name).await {
                Ok(broker_name) => self.symbols.push(TrackedSymbol { name, broker_name }),
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }
        if self.symbols.is_empty() {
            bail!("No tradable symbols resolved from {:?}", self.config.symbols);
        }

        let names: Vec<&str> = self.symbols.iter().map(|s| s.broker_name.as_str()).collect();
        info!("Symbols: {}", names.join(", "));
        info!(
            "Timeframes: {}/{}/{} | Policy: {} | Orders: {:?}",
            self.config.htf, self.config.mtf, self.config.ltf, self.config.match_policy, self.config.order_mode
        );
        info!("{}", "=".repeat(60));
        Ok(())
    }

    /// Runs ticks until Ctrl-C, the running flag drops, or too many
    /// consecutive ticks fail.
    pub async fn run(&mut self, mut running: watch::Receiver<bool>) -> Result<()> {
        self.start().await?;
        info!("Bot is now running. Press Ctrl+C to stop.");

        let mut failures = 0u32;
        loop {
            if !*running.borrow() {
                break;
            }

            let wait = match self.tick(&running).await {
                Ok(summary) => {
                    failures = 0;
                    if summary.interrupted {
                        break;
                    }
                    Duration::from_secs(self.config.poll_interval_secs)
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_consecutive_errors {
                        error!("Giving up after {} consecutive failures", failures);
                        return Err(e.context("control loop failed repeatedly"));
                    }
                    let delay = backoff_delay(self.config.backoff_base_secs, self.config.backoff_cap_secs, failures);
                    warn!("Tick failed ({}): {:#}. Retrying in {}s", failures, e, delay.as_secs());
                    delay
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received");
                    break;
                }
                changed = running.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One pass over every symbol. The running flag is checked between symbols.
    pub async fn tick(&mut self, running: &watch::Receiver<bool>) -> Result<TickSummary> {
        let mut summary = TickSummary::default();
        let positions = self
            .broker
            .get_open_positions()
            .await
            .context("Failed to fetch open positions")?;
        self.forget_closed(&positions);

        for symbol in self.symbols.clone() {
            if !*running.borrow() {
                info!("Stop requested, ending pass before {}", symbol.name);
                summary.interrupted = true;
                break;
            }

            if self.trades.values().any(|t| t.symbol == symbol.broker_name) {
                match self.manage_symbol(&symbol).await {
                    Ok(n) => summary.actions += n,
                    Err(e) => {
                        warn!("[{}] trade management failed: {:#}", symbol.name, e);
                        summary.skipped += 1;
                    }
                }
                continue;
            }

            match self.evaluate_symbol(&symbol, &positions).await {
                Ok(true) => summary.orders += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("[{}] skipped: {:#}", symbol.name, e);
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    fn forget_closed(&mut self, positions: &[OpenPosition]) {
        let closed: Vec<u64> = self
            .trades
            .keys()
            .filter(|t| !positions.iter().any(|p| p.ticket == **t))
            .copied()
            .collect();
        for ticket in closed {
            if let Some(trade) = self.trades.remove(&ticket) {
                info!("[{}] #{} no longer open ({} stage)", trade.symbol, ticket, trade.stage);
            }
        }
    }

    /// At most one lifecycle action per trade per tick.
    async fn manage_symbol(&mut self, symbol: &TrackedSymbol) -> Result<usize> {
        let price = self.broker.get_price(&symbol.broker_name).await?;
        let tickets: Vec<u64> = self
            .trades
            .values()
            .filter(|t| t.symbol == symbol.broker_name)
            .map(|t| t.ticket)
            .collect();

        let mut applied = 0;
        for ticket in tickets {
            let Some(trade) = self.trades.get_mut(&ticket) else {
                continue;
            };
            let before = trade.clone();
            let Some(action) = trade.manage(price) else {
                continue;
            };

            let result = match self.broker.apply_action(ticket, &action).await {
                Ok(r) => r,
                Err(e) => {
                    self.trades.insert(ticket, before);
                    return Err(e.context(format!("applying {} to #{}", action, ticket)));
                }
            };
            if !result.is_done() {
                warn!(
                    "[{}] #{} {} rejected: {} ({})",
                    symbol.name, ticket, action, result.comment, result.retcode
                );
                // retried next tick from the previous stage
                self.trades.insert(ticket, before);
                continue;
            }

            if let Some(trade) = self.trades.get_mut(&ticket) {
                trade.confirm(&action);
            }
            info!("[{}] #{} {} @ {:.5}", symbol.name, ticket, action, price);
            applied += 1;
            spawn_trade(
                self.store.clone(),
                TradeRecord::new(ticket, &symbol.name, TradeEvent::Managed { action }, self.clock.now()),
            );
        }
        Ok(applied)
    }

    /// Positions renamed to configured symbol names so the allocator can
    /// match them against its correlated groups. Unknown names pass through.
    fn with_configured_names(&self, positions: &[OpenPosition]) -> Vec<OpenPosition> {
        let groups = &self.allocator.limits.correlated_groups;
        positions
            .iter()
            .map(|p| {
                let name = self
                    .symbols
                    .iter()
                    .find(|s| s.broker_name == p.symbol)
                    .map(|s| s.name.as_str())
                    .or_else(|| canonical_name(&p.symbol, groups.iter().flatten().map(String::as_str)));
                match name {
                    Some(name) => OpenPosition {
                        symbol: name.to_string(),
                        ..p.clone()
                    },
                    None => p.clone(),
                }
            })
            .collect()
    }

    async fn fetch_frames(&mut self, broker_name: &str) -> HashMap<Timeframe, BarSeries> {
        let mut frames = HashMap::new();
        for tf in self.analyzer.timeframes() {
            if frames.contains_key(&tf) {
                continue;
            }
            match self.broker.fetch_bars(broker_name, tf, self.config.bar_count).await {
                Ok(bars) => {
                    frames.insert(tf, bars);
                }
                Err(e) => debug!("[{}] {} bars unavailable: {:#}", broker_name, tf, e),
            }
        }
        frames
    }

    async fn correlated_pair(&mut self, symbol: &TrackedSymbol, ltf: Option<&BarSeries>) -> Option<CorrelatedPair> {
        let partner = self.config.smt_partner(&symbol.name)?.to_string();
        let partner_name = self
            .symbols
            .iter()
            .find(|s| s.name == partner)
            .map(|s| s.broker_name.clone())
            .unwrap_or(partner);

        let window = self.config.smt_window;
        let primary = SmtSnapshot::from_bars(ltf?, window)?;
        let bars = match self
            .broker
            .fetch_bars(&partner_name, self.config.ltf, window * 2)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                debug!("[{}] SMT partner {} unavailable: {:#}", symbol.name, partner_name, e);
                return None;
            }
        };
        let correlated = SmtSnapshot::from_bars(&bars, window)?;
        Some(CorrelatedPair {
            symbol: partner_name,
            primary,
            correlated,
        })
    }

    /// Runs the entry pipeline. `Ok(true)` when an order was placed.
    async fn evaluate_symbol(&mut self, symbol: &TrackedSymbol, positions: &[OpenPosition]) -> Result<bool> {
        let name = symbol.name.as_str();
        let broker_name = symbol.broker_name.as_str();

        if !self.session.is_trading_session(Some(self.clock.now())) {
            debug!("[{}] outside trading sessions", name);
            return Ok(false);
        }
        if !news_allows_trade(self.news.as_ref(), name) {
            info!("[{}] blocked by news", name);
            return Ok(false);
        }

        let price = self.broker.get_price(broker_name).await?;
        let frames = self.fetch_frames(broker_name).await;
        let ltf = self.config.ltf;
        let ltf_bars = frames.get(&ltf).cloned().unwrap_or_default();
        let correlated = self.correlated_pair(symbol, frames.get(&ltf)).await;
        let analysis = self.analyzer.analyze(name, price, &frames).with_correlated(correlated);

        let Some(direction) = analysis.overall_trend.to_direction() else {
            debug!("[{}] no directional bias ({})", name, analysis.overall_trend);
            return Ok(false);
        };
        if !liquidity_taken(price, &analysis.mtf.liquidity, direction) {
            debug!("[{}] liquidity not taken for {}", name, direction);
            return Ok(false);
        }

        let Some(signal) = self.entry.check(&analysis) else {
            return Ok(false);
        };
        if !smt_confirmed(signal.direction, analysis.correlated.as_ref()) {
            return Ok(false);
        }

        let daily = match self
            .broker
            .fetch_bars(broker_name, Timeframe::D1, self.config.daily_bar_count)
            .await
        {
            Ok(bars) => daily_trend(&bars, self.config.swing_lookback),
            Err(e) => Err(AnalysisError::Source(format!("{:#}", e))),
        };
        let quality = self.rule_scorer.score(&signal, daily);
        if quality < self.rule_scorer.pass_score {
            debug!("[{}] rule score {} below {}", name, quality, self.rule_scorer.pass_score);
            return Ok(false);
        }

        let verdict = self
            .ml_scorer
            .evaluate(&signal, &analysis, &ltf_bars)
            .with_context(|| format!("scoring {}", name))?;
        if !verdict.passed {
            debug!("[{}] probability {:.2} below threshold", name, verdict.probability);
            return Ok(false);
        }

        let ob_id = signal.order_block.id;
        if !self.cooldown.can_trade(name, ob_id, self.config.cooldown_secs) {
            debug!("[{}] order block {} on cooldown", name, ob_id);
            return Ok(false);
        }

        let held = self.with_configured_names(positions);
        let risk = self.allocator.allocate_risk(name, &held);
        if risk <= 0.0 {
            info!("[{}] no risk budget left", name);
            return Ok(false);
        }

        let kind = choose_order_kind(self.config.order_mode, price, &signal.fvg);
        let entry_price = match kind {
            OrderKind::Market => price,
            OrderKind::Limit { price: limit } => limit,
        };
        let targets = calculate_sl_tp(direction, entry_price, &signal.order_block, self.config.rr, None, None);

        let spec = self.broker.symbol_spec(broker_name).await?;
        let account = self.broker.account().await?;
        let pips = stop_distance_pips(entry_price, targets.stop_loss, spec.pip_size);
        let lot = size_lot(
            account.balance,
            risk,
            pips,
            spec.pip_value,
            spec.min_lot.max(self.config.min_lot),
            spec.max_lot.min(self.config.max_lot),
        );

        let request = OrderRequest {
            symbol: broker_name.to_string(),
            direction,
            kind,
            volume: lot,
            sl: targets.stop_loss,
            tp: targets.take_profit,
            comment: format!("ICT OB {}", ob_id),
            magic: self.config.magic,
        };
        let result = self.broker.place_order(&request).await?;
        if !result.is_done() {
            warn!("[{}] order rejected: {} ({})", name, result.comment, result.retcode);
            return Ok(false);
        }

        self.cooldown.register(name, ob_id);
        self.signals += 1;

        info!("{}", "=".repeat(60));
        info!("SIGNAL — {} {}", direction, name);
        info!("  Entry: {:.5} ({:?})", entry_price, kind);
        info!("  Stop Loss: {:.5} | Take Profit: {:.5}", targets.stop_loss, targets.take_profit);
        info!("  Lot: {:.2} | Risk: {:.2}% | Quality: {} | P: {:.2}", lot, risk, quality, verdict.probability);
        info!(
            "  FVG {:.5}-{:.5} ({}) | OB {:.5}-{:.5} ({})",
            signal.fvg.low, signal.fvg.high, signal.fvg.timeframe, signal.order_block.low, signal.order_block.high, signal.order_block.timeframe
        );
        info!("{}", "=".repeat(60));

        let now = self.clock.now();
        let confidence = self.ml_scorer.has_model().then_some(verdict.probability);
        let mut record = SignalRecord::from_signal(
            &signal,
            targets.stop_loss,
            targets.take_profit,
            Some(quality),
            confidence,
            now,
        );
        record.entry_price = entry_price;
        record.ticket = result.ticket;
        spawn_signal(self.store.clone(), record);

        match result.ticket {
            Some(ticket) => {
                self.trades.insert(
                    ticket,
                    Trade::new(
                        ticket,
                        broker_name,
                        direction,
                        entry_price,
                        targets.stop_loss,
                        targets.take_profit,
                        lot,
                    ),
                );
                spawn_trade(
                    self.store.clone(),
                    TradeRecord::new(
                        ticket,
                        name,
                        TradeEvent::Opened {
                            direction,
                            entry: entry_price,
                            stop_loss: targets.stop_loss,
                            take_profit: targets.take_profit,
                            lot,
                        },
                        now,
                    ),
                );
            }
            None => warn!("[{}] order accepted without a ticket; not managed", name),
        }

        Ok(true)
    }

    fn shutdown(&mut self) {
        info!("Shutting down...");
        info!("Signals this session: {} | Managed trades open: {}", self.signals, self.trades.len());
        info!("Bot stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(backoff_delay(5, 60, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(5, 60, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(5, 60, 4), Duration::from_secs(40));
        assert_eq!(backoff_delay(5, 60, 5), Duration::from_secs(60));
        assert_eq!(backoff_delay(5, 60, 40), Duration::from_secs(60));
    }
}
