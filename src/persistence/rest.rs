use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::persistence::{RetryPolicy, SignalRecord, SignalStore, TradeRecord};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgREST-style table inserts (`POST {url}/rest/v1/{table}`).
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    signals_table: String,
    trades_table: String,
    retry: RetryPolicy,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        api_key: &str,
        signals_table: &str,
        trades_table: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            signals_table: signals_table.to_string(),
            trades_table: trades_table.to_string(),
            retry,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn insert_once<T: Serialize + Sync>(&self, table: &str, record: &T) -> Result<()> {
        let resp = self
            .client
            .post(self.table_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await
            .with_context(|| format!("Failed to reach store for {}", table))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Store error {} on {}: {}", status, table, body);
        }
        Ok(())
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, record: &T) -> Result<()> {
        let what = format!("insert into {}", table);
        self.retry
            .run(&what, || self.insert_once(table, record))
            .await?;
        debug!("Inserted row into {}", table);
        Ok(())
    }
}

#[async_trait]
impl SignalStore for RestStore {
    async fn persist_signal(&self, record: &SignalRecord) -> Result<()> {
        self.insert(&self.signals_table, record).await
    }

    async fn persist_trade(&self, record: &TradeRecord) -> Result<()> {
        self.insert(&self.trades_table, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn table_urls() {
        let store = RestStore::new(
            "https://db.example.com/",
            "key",
            "bot_signals",
            "bot_logs",
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            store.table_url(&store.signals_table),
            "https://db.example.com/rest/v1/bot_signals"
        );
    }

    /// Local endpoint answering every insert with a 500. Returns its base
    /// URL and a counter of requests served.
    async fn failing_endpoint() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let served = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                read_request(&mut sock).await;
                served.fetch_add(1, Ordering::SeqCst);
                let _ = sock
                    .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\ndown")
                    .await;
                let _ = sock.shutdown().await;
            }
        });
        (url, hits)
    }

    async fn read_request(sock: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(n) = sock.read(&mut chunk).await else { return };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            let Some(end) = text.find("\r\n\r\n") else { continue };
            let body_len = text[..end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    #[tokio::test]
    async fn failing_store_retries_then_gives_up() {
        let (url, hits) = failing_endpoint().await;
        let store = RestStore::new(
            &url,
            "key",
            "bot_signals",
            "bot_logs",
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        let rec = TradeRecord::new(
            1,
            "EURUSD",
            crate::persistence::TradeEvent::Closed { exit: 1.1, pnl: 0.0 },
            chrono::Utc::now(),
        );
        let err = store.persist_trade(&rec).await.unwrap_err();
        assert!(format!("{:#}", err).contains("500"), "{:#}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
