use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ict_signal_engine::bot::IctBot;
use ict_signal_engine::broker::BridgeBroker;
use ict_signal_engine::config::Config;
use ict_signal_engine::news::{CsvCalendar, NewsGate, NoNews};
use ict_signal_engine::persistence::{LogStore, RestStore, SignalStore};
use ict_signal_engine::risk::cooldown::{Clock, SystemClock};
use ict_signal_engine::strategies::quality::LogisticModel;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let broker = Box::new(BridgeBroker::new(&cfg.bridge_url, cfg.magic)?);

    let store: Arc<dyn SignalStore> = match (&cfg.persistence_url, &cfg.persistence_key) {
        (Some(url), Some(key)) => {
            info!("Persisting signals to {}", url);
            Arc::new(RestStore::new(
                url,
                key,
                &cfg.signals_table,
                &cfg.trades_table,
                cfg.retry_policy(),
            )?)
        }
        _ => Arc::new(LogStore),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let news: Box<dyn NewsGate> = match &cfg.news_calendar_path {
        Some(path) => match CsvCalendar::from_path(path, clock.clone()) {
            Ok(cal) => {
                info!("Loaded {} news events from {:?}", cal.len(), path);
                Box::new(cal.with_window(cfg.news_minutes_before, cfg.news_minutes_after))
            }
            Err(e) => {
                warn!("News calendar unavailable, trading without it: {:#}", e);
                Box::new(NoNews)
            }
        },
        None => Box::new(NoNews),
    };

    let model = match &cfg.model_path {
        Some(path) => match LogisticModel::from_json_file(path) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Quality model unavailable, rule scoring only: {:#}", e);
                None
            }
        },
        None => None,
    };

    let (running_tx, running_rx) = watch::channel(true);

    let mut bot = IctBot::new(cfg, broker, store, news, clock);
    if let Some(model) = model {
        bot = bot.with_model(Box::new(model));
    }
    bot.run(running_rx).await?;

    drop(running_tx);
    Ok(())
}
