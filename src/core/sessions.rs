use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Inclusive hour window, e.g. 7..=11 covers 07:00 through 11:59.
/// A start after the end wraps midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl SessionWindow {
    pub fn new(name: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            name: name.to_string(),
            start_hour,
            end_hour,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour <= self.end_hour
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }

    /// Parses `name:start-end`, e.g. `london:7-11`.
    pub fn parse(spec: &str) -> Option<Self> {
        let (name, hours) = spec.trim().split_once(':')?;
        let (start, end) = hours.split_once('-')?;
        let start_hour: u32 = start.trim().parse().ok()?;
        let end_hour: u32 = end.trim().parse().ok()?;
        if start_hour > 23 || end_hour > 23 || name.trim().is_empty() {
            return None;
        }
        Some(Self::new(name.trim(), start_hour, end_hour))
    }
}

pub fn default_sessions() -> Vec<SessionWindow> {
    vec![
        SessionWindow::new("london", 7, 11),
        SessionWindow::new("new_york", 12, 17),
    ]
}

pub struct SessionManager {
    pub timezone: Tz,
    pub windows: Vec<SessionWindow>,
    pub current_session: Option<String>,
}

impl SessionManager {
    pub fn new(timezone: Tz, windows: Vec<SessionWindow>) -> Self {
        Self {
            timezone,
            windows,
            current_session: None,
        }
    }

    /// Re-evaluates the active window at `utc_now` (wall clock when `None`).
    pub fn update(&mut self, utc_now: Option<DateTime<Utc>>) -> Option<&str> {
        let utc_now = utc_now.unwrap_or_else(Utc::now);
        let hour = utc_now.with_timezone(&self.timezone).hour();
        self.current_session = self
            .windows
            .iter()
            .find(|w| w.contains_hour(hour))
            .map(|w| w.name.clone());
        self.current_session.as_deref()
    }

    pub fn is_trading_session(&mut self, utc_now: Option<DateTime<Utc>>) -> bool {
        self.update(utc_now).is_some()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(chrono_tz::UTC, default_sessions())
    }
}
