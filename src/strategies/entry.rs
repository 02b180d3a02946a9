use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::core::fib::FibonacciRange;
use crate::core::pd_arrays::{FairValueGap, OrderBlock, PriceZone};
use crate::models::{Bias, FibZone, Trend};
use crate::strategies::analysis::MarketAnalysis;
use crate::strategies::signals::Signal;

/// How a gate picks among several qualifying zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First candidate in detector scan order.
    #[default]
    FirstInScanOrder,
    /// Narrowest band.
    Tightest,
    /// Highest bar index.
    MostRecent,
}

impl MatchPolicy {
    pub fn select<'a, Z, I>(&self, candidates: I) -> Option<&'a Z>
    where
        Z: PriceZone + 'a,
        I: IntoIterator<Item = &'a Z>,
    {
        let mut it = candidates.into_iter();
        match self {
            MatchPolicy::FirstInScanOrder => it.next(),
            // ties keep the earlier candidate
            MatchPolicy::Tightest => it.fold(None, |best: Option<&'a Z>, z| match best {
                Some(b) if b.width() <= z.width() => Some(b),
                _ => Some(z),
            }),
            MatchPolicy::MostRecent => it.fold(None, |best: Option<&'a Z>, z| match best {
                Some(b) if b.index() >= z.index() => Some(b),
                _ => Some(z),
            }),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first_in_scan_order" => Some(MatchPolicy::FirstInScanOrder),
            "tightest" => Some(MatchPolicy::Tightest),
            "most_recent" | "recent" => Some(MatchPolicy::MostRecent),
            _ => None,
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::FirstInScanOrder => write!(f, "first_in_scan_order"),
            MatchPolicy::Tightest => write!(f, "tightest"),
            MatchPolicy::MostRecent => write!(f, "most_recent"),
        }
    }
}

/// Fib location, then LTF FVG, then an MTF order block enclosing that FVG.
pub struct EntryModel {
    pub fvg_policy: MatchPolicy,
    pub ob_policy: MatchPolicy,
}

impl EntryModel {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            fvg_policy: policy,
            ob_policy: policy,
        }
    }

    pub fn check(&self, analysis: &MarketAnalysis) -> Option<Signal> {
        check_entry(
            &analysis.symbol,
            analysis.overall_trend,
            analysis.price,
            analysis.mtf.fib.as_ref(),
            &analysis.ltf.fvgs,
            &analysis.mtf.order_blocks,
            self.fvg_policy,
            self.ob_policy,
        )
    }
}

impl Default for EntryModel {
    fn default() -> Self {
        Self::new(MatchPolicy::default())
    }
}

fn in_fib_band(bias: Bias, price: f64, fib: &FibonacciRange) -> bool {
    let bounds = match bias {
        Bias::Bullish => (fib.level(0.25), fib.level(0.5)),
        Bias::Bearish => (fib.level(0.5), fib.level(0.75)),
    };
    match bounds {
        (Some(lo), Some(hi)) => lo <= price && price <= hi,
        _ => false,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn check_entry(
    symbol: &str,
    trend: Trend,
    price: f64,
    fib: Option<&FibonacciRange>,
    fvgs: &[FairValueGap],
    order_blocks: &[OrderBlock],
    fvg_policy: MatchPolicy,
    ob_policy: MatchPolicy,
) -> Option<Signal> {
    let Some(bias) = trend.bias() else {
        debug!("[{}] no entry: trend is {}", symbol, trend);
        return None;
    };

    let Some(fib) = fib else {
        debug!("[{}] no entry: MTF fib unavailable", symbol);
        return None;
    };
    if !in_fib_band(bias, price, fib) {
        debug!("[{}] no entry: {:.5} outside {} fib band", symbol, price, bias);
        return None;
    }

    let fvg = fvg_policy.select(
        fvgs.iter()
            .filter(|g| g.kind == bias && g.contains(price)),
    );
    let Some(fvg) = fvg else {
        debug!("[{}] no entry: no {} LTF FVG at {:.5}", symbol, bias, price);
        return None;
    };

    let ob = ob_policy.select(
        order_blocks
            .iter()
            .filter(|ob| ob.kind == bias && ob.encloses(fvg)),
    );
    let Some(ob) = ob else {
        debug!("[{}] no entry: no {} MTF order block around FVG", symbol, bias);
        return None;
    };

    Some(Signal {
        symbol: symbol.to_string(),
        direction: bias.to_direction(),
        trend,
        price,
        fvg: *fvg,
        order_block: *ob,
        fib_zone: FibZone::for_bias(bias),
    })
}
