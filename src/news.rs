use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::symbols::currency_legs;
use crate::risk::cooldown::Clock;

pub const DEFAULT_MINUTES_BEFORE: i64 = 30;
pub const DEFAULT_MINUTES_AFTER: i64 = 15;

/// Veto on trading a currency around scheduled news.
pub trait NewsGate: Send + Sync {
    fn is_blocked(&self, currency: &str) -> bool;
}

/// Never blocks.
pub struct NoNews;

impl NewsGate for NoNews {
    fn is_blocked(&self, _currency: &str) -> bool {
        false
    }
}

/// Both currency legs must be clear. Symbols without FX legs are never blocked.
pub fn news_allows_trade(gate: &dyn NewsGate, symbol: &str) -> bool {
    match currency_legs(symbol) {
        Some((base, quote)) => !(gate.is_blocked(base) || gate.is_blocked(quote)),
        None => true,
    }
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    date: String,
    currency: String,
    #[serde(default)]
    event: String,
}

#[derive(Debug, Clone, PartialEq)]
enum EventTime {
    /// Blocks the whole UTC day.
    Day(NaiveDate),
    At(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct NewsEvent {
    currency: String,
    when: EventTime,
    pub name: String,
}

fn parse_when(s: &str) -> Option<EventTime> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(EventTime::Day(d));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(EventTime::At(t.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .ok()
        .map(|t| EventTime::At(t.and_utc()))
}

/// Calendar loaded from `date,currency,event` CSV rows. `date` is either a
/// day (`2024-01-15`, blocks the day) or a time (`2024-01-15 13:30`, blocks
/// a window around it).
pub struct CsvCalendar {
    events: Vec<NewsEvent>,
    minutes_before: i64,
    minutes_after: i64,
    clock: Arc<dyn Clock>,
}

impl CsvCalendar {
    pub fn from_reader<R: Read>(reader: R, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut events = Vec::new();
        for result in rdr.deserialize::<CalendarRow>() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed calendar row: {}", e);
                    continue;
                }
            };
            let Some(when) = parse_when(&row.date) else {
                warn!("Skipping calendar row with bad date {:?}", row.date);
                continue;
            };
            events.push(NewsEvent {
                currency: row.currency.to_ascii_uppercase(),
                when,
                name: row.event,
            });
        }
        debug!("Loaded {} news events", events.len());
        Ok(Self {
            events,
            minutes_before: DEFAULT_MINUTES_BEFORE,
            minutes_after: DEFAULT_MINUTES_AFTER,
            clock,
        })
    }

    /// `clock` decides what "now" is; a replay passes its simulated clock.
    pub fn from_path(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open news calendar: {:?}", path))?;
        Self::from_reader(file, clock)
    }

    pub fn with_window(mut self, minutes_before: i64, minutes_after: i64) -> Self {
        self.minutes_before = minutes_before.max(0);
        self.minutes_after = minutes_after.max(0);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl NewsGate for CsvCalendar {
    fn is_blocked(&self, currency: &str) -> bool {
        let now = self.clock.now();
        let before = Duration::minutes(self.minutes_before);
        let after = Duration::minutes(self.minutes_after);
        self.events
            .iter()
            .filter(|e| e.currency.eq_ignore_ascii_case(currency))
            .any(|e| match e.when {
                EventTime::Day(d) => d == now.date_naive(),
                EventTime::At(t) => now - after <= t && t <= now + before,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::cooldown::ManualClock;

    const CSV: &str = "date,currency,event\n\
        2024-01-15,USD,CPI\n\
        not-a-date,EUR,GDP\n\
        2024-01-16 13:30,GBP,Rate Decision\n";

    fn at(s: &str) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc),
        ))
    }

    #[test]
    fn day_rows_block_the_whole_day() {
        let cal = CsvCalendar::from_reader(CSV.as_bytes(), at("2024-01-15T22:00:00Z")).unwrap();
        assert_eq!(cal.len(), 2);
        assert!(cal.is_blocked("USD"));
        assert!(!cal.is_blocked("EUR"));
        assert!(!news_allows_trade(&cal, "EURUSD"));
        assert!(news_allows_trade(&cal, "EURJPY"));
        assert!(news_allows_trade(&cal, "US30"));
    }

    #[test]
    fn timed_rows_block_a_window() {
        let clock = at("2024-01-16T13:05:00Z");
        let cal = CsvCalendar::from_reader(CSV.as_bytes(), clock.clone()).unwrap();
        assert!(cal.is_blocked("GBP"));

        clock.set(DateTime::parse_from_rfc3339("2024-01-16T13:50:00Z").unwrap().with_timezone(&Utc));
        assert!(!cal.is_blocked("GBP"));

        clock.set(DateTime::parse_from_rfc3339("2024-01-16T12:55:00Z").unwrap().with_timezone(&Utc));
        assert!(!cal.is_blocked("GBP"));
    }

    #[test]
    fn file_calendar_follows_the_given_clock() {
        let path = std::env::temp_dir().join(format!("ict-news-{}.csv", std::process::id()));
        std::fs::write(&path, CSV).unwrap();

        let clock = at("2024-01-15T09:00:00Z");
        let cal = CsvCalendar::from_path(&path, clock.clone()).unwrap();
        assert!(cal.is_blocked("USD"));
        clock.set(DateTime::parse_from_rfc3339("2024-01-17T09:00:00Z").unwrap().with_timezone(&Utc));
        assert!(!cal.is_blocked("USD"));

        std::fs::remove_file(&path).unwrap();
        assert!(CsvCalendar::from_path(&path, clock).is_err());
    }

    #[test]
    fn no_news_never_blocks() {
        assert!(news_allows_trade(&NoNews, "EURUSD"));
    }
}
