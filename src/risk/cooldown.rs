use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::pd_arrays::OrderBlockId;

pub const DEFAULT_COOLDOWN_SECS: i64 = 1800;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock moved by hand; shared by the replay broker and tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = t;
        }
    }

    pub fn advance(&self, secs: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += Duration::seconds(secs);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Last trade time per (symbol, order block). Entries are never evicted.
pub struct CooldownStore {
    clock: Arc<dyn Clock>,
    entries: HashMap<(String, OrderBlockId), DateTime<Utc>>,
}

impl CooldownStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: HashMap::new(),
        }
    }

    /// False while fewer than `cooldown_secs` have passed since the key was registered.
    pub fn can_trade(&self, symbol: &str, ob_id: OrderBlockId, cooldown_secs: i64) -> bool {
        match self.entries.get(&(symbol.to_string(), ob_id)) {
            None => true,
            Some(last) => (self.clock.now() - *last).num_seconds() >= cooldown_secs,
        }
    }

    pub fn register(&mut self, symbol: &str, ob_id: OrderBlockId) {
        self.entries.insert((symbol.to_string(), ob_id), self.clock.now());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CooldownStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()))
    }

    #[test]
    fn blocks_until_cooldown_elapses() {
        let clock = clock();
        let mut store = CooldownStore::new(clock.clone());
        store.register("EURUSD", OrderBlockId(7));
        assert!(!store.can_trade("EURUSD", OrderBlockId(7), DEFAULT_COOLDOWN_SECS));

        clock.advance(1799);
        assert!(!store.can_trade("EURUSD", OrderBlockId(7), DEFAULT_COOLDOWN_SECS));

        clock.advance(1);
        assert!(store.can_trade("EURUSD", OrderBlockId(7), DEFAULT_COOLDOWN_SECS));
    }

    #[test]
    fn unseen_keys_are_always_allowed() {
        let mut store = CooldownStore::new(clock());
        store.register("EURUSD", OrderBlockId(7));
        assert!(store.can_trade("EURUSD", OrderBlockId(8), DEFAULT_COOLDOWN_SECS));
        assert!(store.can_trade("GBPUSD", OrderBlockId(7), DEFAULT_COOLDOWN_SECS));
    }

    #[test]
    fn register_overwrites_timestamp() {
        let clock = clock();
        let mut store = CooldownStore::new(clock.clone());
        store.register("EURUSD", OrderBlockId(7));
        clock.advance(1500);
        store.register("EURUSD", OrderBlockId(7));
        clock.advance(1500);
        assert!(!store.can_trade("EURUSD", OrderBlockId(7), DEFAULT_COOLDOWN_SECS));
        assert_eq!(store.len(), 1);
    }
}
