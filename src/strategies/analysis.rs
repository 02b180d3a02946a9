use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::core::fib::FibonacciRange;
use crate::core::liquidity::{detect_liquidity_zones, LiquidityZones, DEFAULT_EQUAL_TOLERANCE};
use crate::core::pd_arrays::{detect_fvgs, detect_order_blocks_local, FairValueGap, OrderBlock};
use crate::core::smt::CorrelatedPair;
use crate::core::structure::MarketStructure;
use crate::core::AnalysisError;
use crate::models::{BarSeries, Timeframe, Trend};

/// Everything one timeframe contributes to the top-down read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub timeframe: Timeframe,
    pub trend: Trend,
    pub fib: Option<FibonacciRange>,
    pub fvgs: Vec<FairValueGap>,
    pub order_blocks: Vec<OrderBlock>,
    pub liquidity: LiquidityZones,
    /// Set when analysis failed and the defaults below were substituted.
    pub degraded: bool,
}

impl TimeframeSnapshot {
    pub fn neutral(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            trend: Trend::Neutral,
            fib: None,
            fvgs: Vec::new(),
            order_blocks: Vec::new(),
            liquidity: LiquidityZones::default(),
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub symbol: String,
    pub price: f64,
    pub overall_trend: Trend,
    pub htf: TimeframeSnapshot,
    pub mtf: TimeframeSnapshot,
    pub ltf: TimeframeSnapshot,
    pub correlated: Option<CorrelatedPair>,
}

impl MarketAnalysis {
    pub fn with_correlated(mut self, pair: Option<CorrelatedPair>) -> Self {
        self.correlated = pair;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub htf: Timeframe,
    pub mtf: Timeframe,
    pub ltf: Timeframe,
    pub swing_lookback: usize,
    /// Bars used for the dealing range; the whole series when it is shorter.
    pub fib_window: usize,
    pub equal_tolerance: f64,
    pub min_bars: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            htf: Timeframe::H4,
            mtf: Timeframe::H1,
            ltf: Timeframe::M15,
            swing_lookback: 3,
            fib_window: 200,
            equal_tolerance: DEFAULT_EQUAL_TOLERANCE,
            min_bars: 10,
        }
    }
}

pub struct TopDownAnalyzer {
    pub settings: AnalyzerSettings,
}

impl TopDownAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    pub fn timeframes(&self) -> [Timeframe; 3] {
        [self.settings.htf, self.settings.mtf, self.settings.ltf]
    }

    /// Runs every detector for one timeframe. Any failure fails the whole
    /// timeframe; callers decide how to degrade.
    pub fn analyze_timeframe(
        &self,
        timeframe: Timeframe,
        bars: &BarSeries,
    ) -> Result<TimeframeSnapshot, AnalysisError> {
        let needed = self.settings.min_bars.max(self.settings.swing_lookback * 2 + 1);
        if bars.len() < needed {
            return Err(AnalysisError::InsufficientBars {
                timeframe,
                needed,
                got: bars.len(),
            });
        }

        let mut structure = MarketStructure::with_lookback(self.settings.swing_lookback);
        let trend = structure.analyze(bars);
        let fib = FibonacciRange::from_bars(&bars.tail(self.settings.fib_window))?;
        let fvgs = detect_fvgs(bars, timeframe);
        let order_blocks = detect_order_blocks_local(bars, timeframe);
        let liquidity = detect_liquidity_zones(&structure.swings, self.settings.equal_tolerance);

        Ok(TimeframeSnapshot {
            timeframe,
            trend,
            fib: Some(fib),
            fvgs,
            order_blocks,
            liquidity,
            degraded: false,
        })
    }

    /// Builds HTF/MTF/LTF snapshots from `frames`. A timeframe that is missing
    /// or fails analysis becomes [`TimeframeSnapshot::neutral`].
    pub fn analyze(
        &self,
        symbol: &str,
        price: f64,
        frames: &HashMap<Timeframe, BarSeries>,
    ) -> MarketAnalysis {
        let snapshot = |tf: Timeframe| {
            let result = match frames.get(&tf) {
                Some(bars) => self.analyze_timeframe(tf, bars),
                None => Err(AnalysisError::MissingBars {
                    symbol: symbol.to_string(),
                    timeframe: tf,
                }),
            };
            result.unwrap_or_else(|e| {
                warn!("[{}] {} degraded to neutral: {}", symbol, tf, e);
                TimeframeSnapshot::neutral(tf)
            })
        };

        let htf = snapshot(self.settings.htf);
        let mtf = snapshot(self.settings.mtf);
        let ltf = snapshot(self.settings.ltf);

        MarketAnalysis {
            symbol: symbol.to_string(),
            price,
            overall_trend: htf.trend,
            htf,
            mtf,
            ltf,
            correlated: None,
        }
    }
}

impl Default for TopDownAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerSettings::default())
    }
}
