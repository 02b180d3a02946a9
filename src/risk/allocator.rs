use serde::{Deserialize, Serialize};

const MAX_TOTAL_RISK: f64 = 2.0;
const MAX_SYMBOL_RISK: f64 = 0.75;
const GROUP_RISK_THRESHOLD: f64 = 1.0;
const CAPPED_GROUP_RISK: f64 = 0.25;
/// Assumed risk for a position the broker reports without one.
pub const DEFAULT_POSITION_RISK: f64 = 0.5;

fn default_position_risk() -> f64 {
    DEFAULT_POSITION_RISK
}

/// Broker view of an open position; `risk` is its share of the account in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub volume: f64,
    pub price: f64,
    pub profit: f64,
    #[serde(default = "default_position_risk")]
    pub risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_total_risk: f64,
    pub max_symbol_risk: f64,
    pub correlated_groups: Vec<Vec<String>>,
    pub group_threshold: f64,
    pub capped_risk: f64,
}

pub fn default_correlated_groups() -> Vec<Vec<String>> {
    [
        ["EURUSD", "GBPUSD"],
        ["USDJPY", "USDCHF"],
        ["AUDUSD", "NZDUSD"],
        ["BTCUSD", "ETHUSD"],
    ]
    .iter()
    .map(|g| g.iter().map(|s| s.to_string()).collect())
    .collect()
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_total_risk: MAX_TOTAL_RISK,
            max_symbol_risk: MAX_SYMBOL_RISK,
            correlated_groups: default_correlated_groups(),
            group_threshold: GROUP_RISK_THRESHOLD,
            capped_risk: CAPPED_GROUP_RISK,
        }
    }
}

pub struct PortfolioAllocator {
    pub limits: RiskLimits,
}

impl PortfolioAllocator {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Risk percent available for a new `symbol` position. Checks run in
    /// order: total cap, symbol cap, correlated group, then remaining headroom.
    pub fn allocate_risk(&self, symbol: &str, positions: &[OpenPosition]) -> f64 {
        let l = &self.limits;
        let used: f64 = positions.iter().map(|p| p.risk).sum();
        if used >= l.max_total_risk {
            return 0.0;
        }

        let symbol_risk: f64 = positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.risk)
            .sum();
        if symbol_risk >= l.max_symbol_risk {
            return 0.0;
        }

        for group in l.correlated_groups.iter().filter(|g| g.iter().any(|s| s == symbol)) {
            let group_risk: f64 = positions
                .iter()
                .filter(|p| group.contains(&p.symbol))
                .map(|p| p.risk)
                .sum();
            if group_risk >= l.group_threshold {
                return l.capped_risk;
            }
        }

        (l.max_symbol_risk - symbol_risk).min(l.max_total_risk - used)
    }
}

impl Default for PortfolioAllocator {
    fn default() -> Self {
        Self::new(RiskLimits::default())
    }
}

/// `balance * risk% / (pips * pip_value)`, rounded to two decimals then
/// clamped to `[min_lot, max_lot]`. Unusable inputs fall back to `min_lot`.
pub fn size_lot(
    balance: f64,
    risk_percent: f64,
    stop_loss_pips: f64,
    pip_value: f64,
    min_lot: f64,
    max_lot: f64,
) -> f64 {
    let inputs = [balance, risk_percent, stop_loss_pips, pip_value];
    if inputs.iter().any(|v| !v.is_finite()) || stop_loss_pips <= 0.0 || pip_value <= 0.0 {
        return min_lot;
    }

    let risk_amount = balance * (risk_percent / 100.0);
    let lot = risk_amount / (stop_loss_pips * pip_value);
    let rounded = (lot * 100.0).round() / 100.0;
    rounded.clamp(min_lot, max_lot.max(min_lot))
}

/// Entry-to-stop distance expressed in pips of `pip_size`.
pub fn stop_distance_pips(entry: f64, stop_loss: f64, pip_size: f64) -> f64 {
    if pip_size <= 0.0 || !pip_size.is_finite() {
        return 0.0;
    }
    (entry - stop_loss).abs() / pip_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(symbol: &str, risk: f64) -> OpenPosition {
        OpenPosition {
            ticket: 1,
            symbol: symbol.to_string(),
            volume: 0.1,
            price: 1.0,
            profit: 0.0,
            risk,
        }
    }

    #[test]
    fn total_cap_denies_everything() {
        let a = PortfolioAllocator::default();
        let open = vec![pos("EURUSD", 0.5), pos("USDJPY", 0.75), pos("XAUUSD", 0.75)];
        assert_eq!(a.allocate_risk("AUDUSD", &open), 0.0);
        assert_eq!(a.allocate_risk("XAUUSD", &open), 0.0);
    }

    #[test]
    fn symbol_cap_denies_symbol() {
        let a = PortfolioAllocator::default();
        let open = vec![pos("XAUUSD", 0.75)];
        assert_eq!(a.allocate_risk("XAUUSD", &open), 0.0);
    }

    #[test]
    fn correlated_group_is_capped() {
        let a = PortfolioAllocator::default();
        let open = vec![pos("EURUSD", 0.5), pos("GBPUSD", 0.5)];
        assert_eq!(a.allocate_risk("EURUSD", &open), 0.25);
        assert_eq!(a.allocate_risk("GBPUSD", &open), 0.25);
    }

    #[test]
    fn otherwise_smallest_headroom() {
        let a = PortfolioAllocator::default();
        assert_eq!(a.allocate_risk("EURUSD", &[]), 0.75);

        let open = vec![pos("EURUSD", 0.25), pos("USDJPY", 0.5), pos("XAUUSD", 0.75)];
        assert!((a.allocate_risk("EURUSD", &open) - 0.5).abs() < 1e-9);

        let open = vec![pos("USDJPY", 0.75), pos("XAUUSD", 0.75), pos("US30", 0.25)];
        assert!((a.allocate_risk("EURUSD", &open) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn lot_sizing() {
        // 10_000 * 1% = 100; 100 / (20 * 10) = 0.5
        assert_eq!(size_lot(10_000.0, 1.0, 20.0, 10.0, 0.01, 100.0), 0.5);
        assert_eq!(size_lot(10_000.0, 1.0, 20.0, 10.0, 0.01, 0.3), 0.3);
        assert_eq!(size_lot(10.0, 0.1, 50.0, 10.0, 0.01, 100.0), 0.01);
    }

    #[test]
    fn unusable_lot_inputs_fall_back_to_min() {
        assert_eq!(size_lot(10_000.0, 1.0, 0.0, 10.0, 0.01, 100.0), 0.01);
        assert_eq!(size_lot(10_000.0, 1.0, 20.0, -1.0, 0.01, 100.0), 0.01);
        assert_eq!(size_lot(f64::NAN, 1.0, 20.0, 10.0, 0.01, 100.0), 0.01);
    }

    #[test]
    fn pips_from_pip_size() {
        assert!((stop_distance_pips(1.1000, 1.0980, 0.0001) - 20.0).abs() < 1e-6);
        assert!((stop_distance_pips(150.00, 150.30, 0.01) - 30.0).abs() < 1e-6);
        assert_eq!(stop_distance_pips(1.1, 1.0, 0.0), 0.0);
    }
}
