use thiserror::Error;

use crate::models::Timeframe;

/// Failures inside one timeframe's analysis. The analyzer logs these and
/// degrades the timeframe instead of propagating them.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no bars available for {symbol} {timeframe}")]
    MissingBars { symbol: String, timeframe: Timeframe },

    #[error("need at least {needed} bars for {timeframe}, got {got}")]
    InsufficientBars {
        timeframe: Timeframe,
        needed: usize,
        got: usize,
    },

    #[error("price window is empty")]
    EmptyWindow,

    #[error("invalid price range (high {high}, low {low})")]
    InvalidRange { high: f64, low: f64 },

    #[error("bar source failed: {0}")]
    Source(String),
}
