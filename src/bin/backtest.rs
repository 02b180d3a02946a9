use anyhow::Result;
use chrono::Duration;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use ict_signal_engine::backtesting::runner::load_data_dir;
use ict_signal_engine::backtesting::BacktestRunner;
use ict_signal_engine::broker::HistoricalBroker;
use ict_signal_engine::config::Config;
use ict_signal_engine::models::Timeframe;
use ict_signal_engine::news::{CsvCalendar, NewsGate, NoNews};
use ict_signal_engine::risk::cooldown::ManualClock;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // backtest [data_dir] [step_minutes] [balance]
    let args: Vec<String> = std::env::args().collect();

    let data_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("data"));

    let step_minutes: i64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(cfg.ltf.as_seconds() as i64 / 60);

    let balance: f64 = args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000.0);

    println!("{}", "=".repeat(60));
    println!("  ICT SIGNAL ENGINE BACKTESTER");
    println!("{}", "=".repeat(60));
    println!("  Symbols:    {}", cfg.symbols.join(", "));
    println!("  Frames:     {}/{}/{}", cfg.htf, cfg.mtf, cfg.ltf);
    println!("  Data:       {:?}", data_dir);
    println!("  Step:       {} minutes", step_minutes);
    println!("  Balance:    ${:.2}", balance);
    println!("{}", "=".repeat(60));
    println!();

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let mut broker = HistoricalBroker::new(clock.clone(), balance);

    let mut timeframes = vec![cfg.ltf, cfg.mtf, cfg.htf, Timeframe::D1];
    timeframes.sort();
    timeframes.dedup();

    let loaded = load_data_dir(&mut broker, &data_dir, &cfg.symbols, &timeframes)?;
    if loaded == 0 {
        println!("ERROR: No bar files found in {:?}.", data_dir);
        println!("Expected files named like EURUSD_M15.csv with timestamp,open,high,low,close,volume columns");
        return Ok(());
    }

    let (Some(data_start), Some(data_end)) = (broker.earliest_time(), broker.latest_time()) else {
        println!("ERROR: Bar files contain no usable rows");
        return Ok(());
    };

    // leave a day of history for the first analysis pass
    let bt_start = data_start + Duration::days(1);
    let bt_end = data_end;

    if bt_start >= bt_end {
        println!("ERROR: Not enough data for backtesting");
        return Ok(());
    }

    let news: Box<dyn NewsGate> = match &cfg.news_calendar_path {
        Some(path) => {
            let cal = CsvCalendar::from_path(path, clock)?;
            println!("  News:       {} events from {:?}", cal.len(), path);
            Box::new(cal.with_window(cfg.news_minutes_before, cfg.news_minutes_after))
        }
        None => Box::new(NoNews),
    };

    let mut runner = BacktestRunner::with_news(cfg, broker, news);
    let metrics = runner.run(bt_start, bt_end, step_minutes).await?;

    metrics.print_summary();

    let report_file = data_dir.join(format!(
        "backtest_{}_{}.json",
        metrics.start.format("%Y%m%d"),
        metrics.end.format("%Y%m%d"),
    ));
    std::fs::write(&report_file, serde_json::to_string_pretty(&metrics)?)?;
    println!("\nReport saved to: {:?}", report_file);

    Ok(())
}
