use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::broker::OrderMode;
use crate::core::liquidity::DEFAULT_EQUAL_TOLERANCE;
use crate::core::sessions::{default_sessions, SessionWindow};
use crate::models::Timeframe;
use crate::persistence::RetryPolicy;
use crate::risk::allocator::{default_correlated_groups, RiskLimits};
use crate::risk::cooldown::DEFAULT_COOLDOWN_SECS;
use crate::risk::sl_tp::DEFAULT_RR;
use crate::strategies::analysis::AnalyzerSettings;
use crate::strategies::entry::MatchPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Instruments
    pub symbols: Vec<String>,
    /// symbol -> correlated symbol used for SMT
    pub smt_pairs: Vec<(String, String)>,
    pub smt_window: usize,

    // Analysis
    pub htf: Timeframe,
    pub mtf: Timeframe,
    pub ltf: Timeframe,
    pub bar_count: usize,
    pub daily_bar_count: usize,
    pub swing_lookback: usize,
    pub fib_window: usize,
    pub equal_tolerance: f64,
    pub min_bars: usize,
    pub match_policy: MatchPolicy,

    // Quality
    pub rule_pass_score: u8,
    pub ml_threshold: f64,
    pub model_path: Option<PathBuf>,

    // Risk
    pub risk_limits: RiskLimits,
    pub min_lot: f64,
    pub max_lot: f64,
    pub rr: f64,
    pub cooldown_secs: i64,

    // Execution
    pub order_mode: OrderMode,
    pub bridge_url: String,
    pub magic: u64,

    // Loop
    pub poll_interval_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub max_consecutive_errors: u32,

    // Sessions
    pub sessions: Vec<SessionWindow>,
    pub session_timezone: String,

    // News
    pub news_calendar_path: Option<PathBuf>,
    pub news_minutes_before: i64,
    pub news_minutes_after: i64,

    // Persistence
    pub persistence_url: Option<String>,
    pub persistence_key: Option<String>,
    pub signals_table: String,
    pub trades_table: String,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,

    // Logging
    pub log_level: String,
}

fn default_smt_pairs() -> Vec<(String, String)> {
    [("EURUSD", "GBPUSD"), ("GBPUSD", "EURUSD"), ("AUDUSD", "NZDUSD"), ("NZDUSD", "AUDUSD")]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_ascii_uppercase())
        .collect()
}

/// `EURUSD:GBPUSD,AUDUSD:NZDUSD`
fn parse_pairs(s: &str) -> Vec<(String, String)> {
    s.split(',')
        .filter_map(|p| {
            let (a, b) = p.split_once(':')?;
            let (a, b) = (a.trim(), b.trim());
            if a.is_empty() || b.is_empty() {
                return None;
            }
            Some((a.to_ascii_uppercase(), b.to_ascii_uppercase()))
        })
        .collect()
}

/// `EURUSD+GBPUSD;USDJPY+USDCHF`
fn parse_groups(s: &str) -> Vec<Vec<String>> {
    s.split(';')
        .map(|g| {
            g.split('+')
                .map(|p| p.trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|g| g.len() > 1)
        .collect()
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Default for Config {
    fn default() -> Self {
        let analyzer = AnalyzerSettings::default();
        let retry = RetryPolicy::default();
        Self {
            symbols: ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "NZDUSD", "USDCAD", "XAUUSD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            smt_pairs: default_smt_pairs(),
            smt_window: 20,
            htf: analyzer.htf,
            mtf: analyzer.mtf,
            ltf: analyzer.ltf,
            bar_count: 300,
            daily_bar_count: 60,
            swing_lookback: analyzer.swing_lookback,
            fib_window: analyzer.fib_window,
            equal_tolerance: DEFAULT_EQUAL_TOLERANCE,
            min_bars: analyzer.min_bars,
            match_policy: MatchPolicy::default(),
            rule_pass_score: 3,
            ml_threshold: 0.65,
            model_path: None,
            risk_limits: RiskLimits::default(),
            min_lot: 0.01,
            max_lot: 100.0,
            rr: DEFAULT_RR,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            order_mode: OrderMode::Auto,
            bridge_url: "http://127.0.0.1:5005".to_string(),
            magic: 234000,
            poll_interval_secs: 5,
            backoff_base_secs: 5,
            backoff_cap_secs: 60,
            max_consecutive_errors: 10,
            sessions: default_sessions(),
            session_timezone: "UTC".to_string(),
            news_calendar_path: None,
            news_minutes_before: 30,
            news_minutes_after: 15,
            persistence_url: None,
            persistence_key: None,
            signals_table: "bot_signals".to_string(),
            trades_table: "bot_logs".to_string(),
            retry_attempts: retry.max_attempts,
            retry_base_ms: retry.base_delay.as_millis() as u64,
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset keys keep their default;
    /// unparseable values fall back to the default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();

        let parse = |key: &str| -> Option<String> { non_empty(lookup(key)) };
        fn num<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
            match raw {
                None => default,
                Some(s) => s.parse().unwrap_or_else(|_| {
                    warn!("Invalid value for {}: {:?}, using default", key, s);
                    default
                }),
            }
        }
        let tf = |key: &str, default: Timeframe| -> Timeframe {
            match parse(key) {
                None => default,
                Some(s) => Timeframe::from_str_loose(&s).unwrap_or_else(|| {
                    warn!("Invalid timeframe for {}: {:?}, using {}", key, s, default);
                    default
                }),
            }
        };

        let symbols = parse("SYMBOLS")
            .map(|s| split_list(&s))
            .filter(|v| !v.is_empty())
            .unwrap_or(d.symbols);

        let smt_pairs = parse("SMT_PAIRS").map(|s| parse_pairs(&s)).unwrap_or(d.smt_pairs);

        let match_policy = match parse("MATCH_POLICY") {
            None => d.match_policy,
            Some(s) => MatchPolicy::parse(&s).unwrap_or_else(|| {
                warn!("Unknown MATCH_POLICY {:?}, using {}", s, d.match_policy);
                d.match_policy
            }),
        };

        let order_mode = match parse("ORDER_MODE") {
            None => d.order_mode,
            Some(s) => OrderMode::parse(&s).unwrap_or_else(|| {
                warn!("Unknown ORDER_MODE {:?}, using auto", s);
                d.order_mode
            }),
        };

        let sessions = match parse("SESSIONS") {
            None => d.sessions,
            Some(s) => {
                let parsed: Vec<SessionWindow> = s.split(',').filter_map(SessionWindow::parse).collect();
                if parsed.is_empty() {
                    warn!("No valid windows in SESSIONS {:?}, using defaults", s);
                    default_sessions()
                } else {
                    parsed
                }
            }
        };

        let groups = parse("CORRELATED_GROUPS")
            .map(|s| parse_groups(&s))
            .unwrap_or_else(default_correlated_groups);

        let risk_limits = RiskLimits {
            max_total_risk: num("MAX_TOTAL_RISK", parse("MAX_TOTAL_RISK"), d.risk_limits.max_total_risk),
            max_symbol_risk: num("MAX_SYMBOL_RISK", parse("MAX_SYMBOL_RISK"), d.risk_limits.max_symbol_risk),
            correlated_groups: groups,
            group_threshold: num("GROUP_RISK_THRESHOLD", parse("GROUP_RISK_THRESHOLD"), d.risk_limits.group_threshold),
            capped_risk: num("CAPPED_GROUP_RISK", parse("CAPPED_GROUP_RISK"), d.risk_limits.capped_risk),
        };

        Config {
            symbols,
            smt_pairs,
            smt_window: num("SMT_WINDOW", parse("SMT_WINDOW"), d.smt_window).max(1),
            htf: tf("HTF", d.htf),
            mtf: tf("MTF", d.mtf),
            ltf: tf("LTF", d.ltf),
            bar_count: num("BAR_COUNT", parse("BAR_COUNT"), d.bar_count),
            daily_bar_count: num("DAILY_BAR_COUNT", parse("DAILY_BAR_COUNT"), d.daily_bar_count),
            swing_lookback: num("SWING_LOOKBACK", parse("SWING_LOOKBACK"), d.swing_lookback).max(1),
            fib_window: num("FIB_WINDOW", parse("FIB_WINDOW"), d.fib_window).max(1),
            equal_tolerance: num("EQUAL_TOLERANCE", parse("EQUAL_TOLERANCE"), d.equal_tolerance),
            min_bars: num("MIN_BARS", parse("MIN_BARS"), d.min_bars),
            match_policy,
            rule_pass_score: num("RULE_PASS_SCORE", parse("RULE_PASS_SCORE"), d.rule_pass_score),
            ml_threshold: num("ML_THRESHOLD", parse("ML_THRESHOLD"), d.ml_threshold),
            model_path: parse("MODEL_PATH").map(PathBuf::from),
            risk_limits,
            min_lot: num("MIN_LOT", parse("MIN_LOT"), d.min_lot),
            max_lot: num("MAX_LOT", parse("MAX_LOT"), d.max_lot),
            rr: num("RISK_REWARD", parse("RISK_REWARD"), d.rr),
            cooldown_secs: num("COOLDOWN_SECS", parse("COOLDOWN_SECS"), d.cooldown_secs),
            order_mode,
            bridge_url: parse("MT5_BRIDGE_URL").unwrap_or(d.bridge_url),
            magic: num("MAGIC", parse("MAGIC"), d.magic),
            poll_interval_secs: num("POLL_INTERVAL_SECS", parse("POLL_INTERVAL_SECS"), d.poll_interval_secs),
            backoff_base_secs: num("BACKOFF_BASE_SECS", parse("BACKOFF_BASE_SECS"), d.backoff_base_secs).max(1),
            backoff_cap_secs: num("BACKOFF_CAP_SECS", parse("BACKOFF_CAP_SECS"), d.backoff_cap_secs),
            max_consecutive_errors: num("MAX_CONSECUTIVE_ERRORS", parse("MAX_CONSECUTIVE_ERRORS"), d.max_consecutive_errors).max(1),
            sessions,
            session_timezone: parse("SESSION_TZ").unwrap_or(d.session_timezone),
            news_calendar_path: parse("NEWS_CALENDAR").map(PathBuf::from),
            news_minutes_before: num("NEWS_MINUTES_BEFORE", parse("NEWS_MINUTES_BEFORE"), d.news_minutes_before),
            news_minutes_after: num("NEWS_MINUTES_AFTER", parse("NEWS_MINUTES_AFTER"), d.news_minutes_after),
            persistence_url: parse("SUPABASE_URL"),
            persistence_key: parse("SUPABASE_KEY"),
            signals_table: parse("BOT_SIGNALS_TABLE").unwrap_or(d.signals_table),
            trades_table: parse("BOT_LOGS_TABLE").unwrap_or(d.trades_table),
            retry_attempts: num("RETRY_ATTEMPTS", parse("RETRY_ATTEMPTS"), d.retry_attempts).max(1),
            retry_base_ms: num("RETRY_BASE_MS", parse("RETRY_BASE_MS"), d.retry_base_ms),
            log_level: parse("LOG_LEVEL").unwrap_or(d.log_level),
        }
    }

    /// Falls back to UTC for an unknown zone name.
    pub fn timezone(&self) -> Tz {
        self.session_timezone.parse().unwrap_or_else(|_| {
            warn!("Unknown timezone {:?}, using UTC", self.session_timezone);
            Tz::UTC
        })
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            htf: self.htf,
            mtf: self.mtf,
            ltf: self.ltf,
            swing_lookback: self.swing_lookback,
            fib_window: self.fib_window,
            equal_tolerance: self.equal_tolerance,
            min_bars: self.min_bars,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: std::time::Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn smt_partner(&self, symbol: &str) -> Option<&str> {
        self.smt_pairs
            .iter()
            .find(|(a, _)| a == symbol)
            .map(|(_, b)| b.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn empty_env_gives_defaults() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.symbols.len(), 7);
        assert_eq!(cfg.risk_limits.max_total_risk, 2.0);
        assert_eq!(cfg.cooldown_secs, 1800);
        assert_eq!(cfg.ml_threshold, 0.65);
        assert_eq!(cfg.htf, Timeframe::H4);
        assert!(cfg.persistence_url.is_none());
        assert_eq!(cfg.signals_table, "bot_signals");
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("MAX_TOTAL_RISK", "lots"),
            ("COOLDOWN_SECS", "-"),
            ("LTF", "M7"),
            ("MATCH_POLICY", "best"),
        ]));
        assert_eq!(cfg.risk_limits.max_total_risk, 2.0);
        assert_eq!(cfg.cooldown_secs, 1800);
        assert_eq!(cfg.ltf, Timeframe::M15);
        assert_eq!(cfg.match_policy, MatchPolicy::default());
    }

    #[test]
    fn lists_and_pairs_parse() {
        let cfg = Config::from_lookup(lookup(&[
            ("SYMBOLS", "eurusd, xauusd ,"),
            ("SMT_PAIRS", "EURUSD:GBPUSD,broken"),
            ("CORRELATED_GROUPS", "EURUSD+GBPUSD;XAUUSD"),
            ("SESSIONS", "asia:0-6"),
            ("SUPABASE_URL", "  "),
        ]));
        assert_eq!(cfg.symbols, vec!["EURUSD", "XAUUSD"]);
        assert_eq!(cfg.smt_partner("EURUSD"), Some("GBPUSD"));
        assert_eq!(cfg.smt_partner("XAUUSD"), None);
        assert_eq!(cfg.risk_limits.correlated_groups.len(), 1);
        assert_eq!(cfg.sessions.len(), 1);
        assert!(cfg.persistence_url.is_none());
    }

    #[test]
    fn unknown_timezone_is_utc() {
        let cfg = Config {
            session_timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert_eq!(cfg.timezone(), Tz::UTC);
    }
}
