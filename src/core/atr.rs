use crate::models::{Bar, BarSeries};

/// TR[0] = high - low; TR[t] = max(high - low, |high - prev close|, |low - prev close|).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let hl = bar.high - bar.low;
        let value = match i.checked_sub(1).map(|p| bars[p].close) {
            Some(pc) => hl.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
            None => hl,
        };
        tr.push(value);
    }
    tr
}

/// Latest Wilder-smoothed ATR. Seeded with the mean of the first `period`
/// true ranges, then `atr = prev + (tr - prev) / period`.
///
/// Malformed bars are dropped before the true range is taken. Returns `None`
/// while fewer than `period` usable bars exist.
pub fn atr(bars: &BarSeries, period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }
    let clean: Vec<Bar> = bars.iter().filter(|b| b.is_well_formed()).cloned().collect();
    let tr = true_range(&clean);
    if tr.len() < period {
        return None;
    }

    let seed = tr[..period].iter().sum::<f64>() / period as f64;
    let alpha = 1.0 / period as f64;
    let value = tr[period..]
        .iter()
        .fold(seed, |prev, &t| prev + alpha * (t - prev));
    Some(value)
}
