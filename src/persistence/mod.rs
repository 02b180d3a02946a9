pub mod records;
pub mod rest;
pub mod retry;

pub use records::{SignalRecord, TradeEvent, TradeRecord};
pub use rest::RestStore;
pub use retry::RetryPolicy;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Best-effort sink for signals and trade events.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn persist_signal(&self, record: &SignalRecord) -> Result<()>;
    async fn persist_trade(&self, record: &TradeRecord) -> Result<()>;
}

/// Writes records to the log only. Used when no REST endpoint is configured.
pub struct LogStore;

#[async_trait]
impl SignalStore for LogStore {
    async fn persist_signal(&self, record: &SignalRecord) -> Result<()> {
        info!(
            "[SIGNAL] {} {} @ {:.5} | SL {:.5} | TP {:.5} | {}",
            record.direction, record.symbol, record.entry_price, record.stop_loss, record.take_profit, record.reason
        );
        Ok(())
    }

    async fn persist_trade(&self, record: &TradeRecord) -> Result<()> {
        match serde_json::to_string(&record.payload) {
            Ok(payload) => info!("[TRADE] #{} {} {}", record.ticket, record.symbol, payload),
            Err(e) => error!("[TRADE] #{} payload not serializable: {}", record.ticket, e),
        }
        Ok(())
    }
}

/// Fire-and-forget signal write; failures are logged and dropped.
pub fn spawn_signal(store: Arc<dyn SignalStore>, record: SignalRecord) {
    tokio::spawn(async move {
        if let Err(e) = store.persist_signal(&record).await {
            error!("Failed to persist signal for {}: {:#}", record.symbol, e);
        }
    });
}

/// Fire-and-forget trade write; failures are logged and dropped.
pub fn spawn_trade(store: Arc<dyn SignalStore>, record: TradeRecord) {
    tokio::spawn(async move {
        if let Err(e) = store.persist_trade(&record).await {
            error!("Failed to persist trade #{}: {:#}", record.ticket, e);
        }
    });
}
