use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bot::IctBot;
use crate::broker::{Broker, HistoricalBroker, SharedHistorical};
use crate::config::Config;
use crate::models::{Bar, Timeframe};
use crate::news::{NewsGate, NoNews};
use crate::persistence::LogStore;
use crate::risk::cooldown::ManualClock;

use super::metrics::BacktestMetrics;

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .map(|t| t.and_utc())
}

/// Reads `timestamp,open,high,low,close[,volume]` rows, oldest first.
/// Timestamps may be unix seconds, RFC 3339 or `%Y-%m-%d %H:%M[:%S]`.
pub fn read_csv_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();
    for result in rdr.deserialize::<CsvBar>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping malformed bar row: {}", e);
                continue;
            }
        };
        let Some(timestamp) = parse_timestamp(&row.timestamp) else {
            warn!("Skipping bar row with bad timestamp {:?}", row.timestamp);
            continue;
        };
        let bar = Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        };
        if !bar.is_well_formed() {
            warn!("Skipping malformed bar at {}", timestamp);
            continue;
        }
        bars.push(bar);
    }
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Aggregates bars into buckets of `tf`, aligned to the unix epoch.
pub fn resample(bars: &[Bar], tf: Timeframe) -> Vec<Bar> {
    let secs = tf.as_seconds() as i64;
    let mut out: Vec<Bar> = Vec::new();
    let mut bucket_start: Option<i64> = None;
    for b in bars {
        let start = b.timestamp.timestamp().div_euclid(secs) * secs;
        if bucket_start == Some(start) {
            if let Some(cur) = out.last_mut() {
                cur.high = cur.high.max(b.high);
                cur.low = cur.low.min(b.low);
                cur.close = b.close;
                cur.volume += b.volume;
                continue;
            }
        }
        let Some(timestamp) = DateTime::from_timestamp(start, 0) else {
            continue;
        };
        bucket_start = Some(start);
        out.push(Bar { timestamp, ..b.clone() });
    }
    out
}

/// Loads `{dir}/{SYMBOL}_{TF}.csv` for every symbol and timeframe. A missing
/// timeframe is resampled from the finest file found for that symbol.
pub fn load_data_dir(
    broker: &mut HistoricalBroker,
    dir: &Path,
    symbols: &[String],
    timeframes: &[Timeframe],
) -> Result<usize> {
    let mut loaded = 0;
    for symbol in symbols {
        let mut found: Vec<(Timeframe, Vec<Bar>)> = Vec::new();
        for &tf in timeframes {
            let path = dir.join(format!("{}_{}.csv", symbol, tf));
            if !path.exists() {
                continue;
            }
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open bar file: {:?}", path))?;
            let bars = read_csv_bars(file)?;
            info!("  {} {}: {} bars", symbol, tf, bars.len());
            found.push((tf, bars));
        }

        found.sort_by_key(|(tf, _)| *tf);
        let Some((finest_tf, finest)) = found.first().cloned() else {
            warn!("No bar files for {} in {:?}", symbol, dir);
            continue;
        };
        for &tf in timeframes {
            if tf > finest_tf && !found.iter().any(|(t, _)| *t == tf) {
                let bars = resample(&finest, tf);
                info!("  {} {}: {} bars (resampled from {})", symbol, tf, bars.len(), finest_tf);
                found.push((tf, bars));
            }
        }
        for (tf, bars) in found {
            broker.load(symbol, tf, bars);
        }
        loaded += 1;
    }
    Ok(loaded)
}

/// Steps a shared clock across the loaded data, running one bot tick per
/// step against a paper book.
pub struct BacktestRunner {
    broker: SharedHistorical,
    clock: Arc<ManualClock>,
    bot: IctBot,
    initial_balance: f64,
}

impl BacktestRunner {
    pub fn new(config: Config, broker: HistoricalBroker) -> Self {
        Self::with_news(config, broker, Box::new(NoNews))
    }

    /// `news` should read the broker's clock so it blocks at replay time.
    pub fn with_news(config: Config, broker: HistoricalBroker, news: Box<dyn NewsGate>) -> Self {
        let clock = broker.clock();
        let initial_balance = broker.balance;
        let broker = SharedHistorical::new(broker);
        let bot = IctBot::new(
            config,
            Box::new(broker.clone()),
            Arc::new(LogStore),
            news,
            clock.clone(),
        );
        Self {
            broker,
            clock,
            bot,
            initial_balance,
        }
    }

    pub async fn run(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_minutes: i64,
    ) -> Result<BacktestMetrics> {
        let step = ChronoDuration::minutes(step_minutes.max(1));
        let total_steps = ((end - start).num_minutes() / step_minutes.max(1)).max(1) as usize;
        let log_interval = total_steps / 20;

        info!("=== BACKTEST START ===");
        info!(
            "Period: {} to {} ({} steps of {}m)",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M"),
            total_steps,
            step_minutes
        );

        self.clock.set(start);
        self.bot.start().await?;

        // the sender lives for the whole replay
        let (_running_tx, running) = watch::channel(true);
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::new();
        let mut current = start;
        let mut step_count = 0usize;

        while current <= end {
            self.clock.set(current);
            step_count += 1;

            if let Err(e) = self.bot.tick(&running).await {
                debug!("Tick at {} failed: {:#}", current, e);
            }

            let equity = {
                let mut book = self.broker.0.lock().await;
                book.settle();
                book.account().await?.equity
            };
            equity_curve.push((current, equity));

            if log_interval > 0 && step_count % log_interval == 0 {
                let book = self.broker.0.lock().await;
                info!(
                    "  Progress: {:.0}% | {} | Balance: ${:.2} | Trades: {} | Signals: {}",
                    step_count as f64 / total_steps as f64 * 100.0,
                    current.format("%Y-%m-%d %H:%M"),
                    book.balance,
                    book.closed.len(),
                    self.bot.signal_count(),
                );
            }

            current += step;
        }

        let mut book = self.broker.0.lock().await;
        book.close_all();
        if let Some(last) = equity_curve.last_mut() {
            last.1 = book.balance;
        }

        info!("=== BACKTEST COMPLETE ===");
        Ok(BacktestMetrics::from_outcomes(
            &book.closed,
            &equity_curve,
            self.initial_balance,
            book.balance,
            self.bot.signal_count(),
        ))
    }
}
