use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::core::atr::atr;
use crate::core::structure::MarketStructure;
use crate::core::AnalysisError;
use crate::models::{BarSeries, Timeframe, Trend};
use crate::strategies::analysis::MarketAnalysis;
use crate::strategies::signals::Signal;

pub const ATR_PERIOD: usize = 14;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("feature unavailable: {0}")]
    MissingFeature(&'static str),

    #[error("model returned invalid probability {0}")]
    InvalidProbability(f64),

    #[error("model failed: {0}")]
    Model(String),
}

/// Confluence points: fib zone, short-timeframe FVG, higher-timeframe order
/// block, agreeing daily trend.
#[derive(Debug, Clone)]
pub struct RuleQualityScorer {
    pub fvg_timeframes: Vec<Timeframe>,
    pub ob_timeframes: Vec<Timeframe>,
    pub pass_score: u8,
}

impl Default for RuleQualityScorer {
    fn default() -> Self {
        Self {
            fvg_timeframes: vec![Timeframe::M15],
            ob_timeframes: vec![Timeframe::H1, Timeframe::H4],
            pass_score: 3,
        }
    }
}

impl RuleQualityScorer {
    /// A failed daily-trend lookup only forfeits its own point.
    pub fn score(&self, signal: &Signal, daily_trend: Result<Trend, AnalysisError>) -> u8 {
        let mut score = 1; // fib zone is always set on a signal
        if self.fvg_timeframes.contains(&signal.fvg.timeframe) {
            score += 1;
        }
        if self.ob_timeframes.contains(&signal.order_block.timeframe) {
            score += 1;
        }
        match daily_trend {
            Ok(trend) if trend == signal.trend => score += 1,
            Ok(_) => {}
            Err(e) => debug!("[{}] daily trend unavailable: {}", signal.symbol, e),
        }
        score
    }

    pub fn passes(&self, signal: &Signal, daily_trend: Result<Trend, AnalysisError>) -> bool {
        self.score(signal, daily_trend) >= self.pass_score
    }
}

/// Trend of the daily series using the regular swing structure.
pub fn daily_trend(bars: &BarSeries, swing_lookback: usize) -> Result<Trend, AnalysisError> {
    let needed = swing_lookback.max(1) * 2 + 1;
    if bars.len() < needed {
        return Err(AnalysisError::InsufficientBars {
            timeframe: Timeframe::D1,
            needed,
            got: bars.len(),
        });
    }
    Ok(MarketStructure::with_lookback(swing_lookback).analyze(bars))
}

/// `[atr, fvg width, order block width, |price - MTF mid fib|]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features(pub [f64; 4]);

impl Features {
    pub fn build(
        signal: &Signal,
        analysis: &MarketAnalysis,
        ltf_bars: &BarSeries,
    ) -> Result<Self, ScoringError> {
        let atr = atr(ltf_bars, ATR_PERIOD).ok_or(ScoringError::MissingFeature("atr"))?;
        let mid = analysis
            .mtf
            .fib
            .map(|f| f.mid())
            .ok_or(ScoringError::MissingFeature("mtf fib"))?;
        Ok(Self([
            atr,
            signal.fvg_width(),
            signal.order_block_width(),
            (signal.price - mid).abs(),
        ]))
    }
}

/// External probability model over [`Features`].
pub trait ScoringModel: Send + Sync {
    fn predict(&self, features: &Features) -> Result<f64, ScoringError>;
}

/// Plain logistic regression loaded from JSON:
/// `{"weights": [w0, w1, w2, w3], "bias": b}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: [f64; 4],
    pub bias: f64,
}

impl LogisticModel {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl ScoringModel for LogisticModel {
    fn predict(&self, features: &Features) -> Result<f64, ScoringError> {
        let z = self
            .weights
            .iter()
            .zip(features.0.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        let p = 1.0 / (1.0 + (-z).exp());
        if p.is_finite() {
            Ok(p)
        } else {
            Err(ScoringError::InvalidProbability(p))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreVerdict {
    pub passed: bool,
    pub probability: f64,
}

pub struct ProbabilisticScorer {
    model: Option<Box<dyn ScoringModel>>,
    pub threshold: f64,
}

impl ProbabilisticScorer {
    pub fn new(model: Option<Box<dyn ScoringModel>>, threshold: f64) -> Self {
        Self { model, threshold }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0.65)
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Without a model every signal passes with probability 1.0.
    pub fn evaluate(
        &self,
        signal: &Signal,
        analysis: &MarketAnalysis,
        ltf_bars: &BarSeries,
    ) -> Result<ScoreVerdict, ScoringError> {
        let Some(model) = &self.model else {
            return Ok(ScoreVerdict {
                passed: true,
                probability: 1.0,
            });
        };

        let features = Features::build(signal, analysis, ltf_bars)?;
        let probability = model.predict(&features)?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(ScoringError::InvalidProbability(probability));
        }
        Ok(ScoreVerdict {
            passed: probability >= self.threshold,
            probability,
        })
    }
}
