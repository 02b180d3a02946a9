use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Direction;

/// Profit factor reported when there are no losing trades.
pub const PROFIT_FACTOR_NO_LOSSES: f64 = 999.0;

/// A closed (or partially closed) trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub exit: f64,
    pub volume: f64,
    pub pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestMetrics {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_pnl: f64,

    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction in [0, 1].
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,

    /// Largest peak-to-trough fall of the equity curve; zero or negative.
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    pub signals: usize,
    pub by_symbol: BTreeMap<String, SymbolStats>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Win rate, profit factor, expectancy. Break-even trades count as neither
/// win nor loss but do count in the total.
pub fn trade_stats(outcomes: &[TradeOutcome]) -> (f64, f64, f64) {
    if outcomes.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let wins: Vec<f64> = outcomes.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
    let losses: Vec<f64> = outcomes.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();

    let win_rate = wins.len() as f64 / outcomes.len() as f64;
    let profit_factor = if losses.is_empty() {
        PROFIT_FACTOR_NO_LOSSES
    } else {
        (wins.iter().sum::<f64>() / losses.iter().sum::<f64>()).abs()
    };
    let pnls: Vec<f64> = outcomes.iter().map(|t| t.pnl).collect();
    (win_rate, profit_factor, mean(&pnls))
}

/// Peak-based drawdown: most negative `value - running peak`, and that fall
/// as a percent of its peak.
pub fn max_drawdown(curve: &[f64]) -> (f64, f64) {
    let Some(&first) = curve.first() else {
        return (0.0, 0.0);
    };
    let mut peak = first;
    let mut dd = 0.0f64;
    let mut dd_pct = 0.0f64;
    for &x in curve {
        peak = peak.max(x);
        let fall = x - peak;
        if fall < dd {
            dd = fall;
            if peak > 0.0 {
                dd_pct = fall / peak * 100.0;
            }
        }
    }
    (dd, dd_pct)
}

fn compute_sharpe(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    // sample once per day
    let mut daily_values: Vec<f64> = Vec::new();
    let mut last_day = None;
    for (ts, val) in equity_curve {
        let day = ts.date_naive();
        if last_day != Some(day) {
            daily_values.push(*val);
            last_day = Some(day);
        }
    }

    if daily_values.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = daily_values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }

    let m = mean(&returns);
    let variance = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }

    // annualised over 252 trading days
    m / std_dev * 252.0_f64.sqrt()
}

impl BacktestMetrics {
    pub fn from_outcomes(
        outcomes: &[TradeOutcome],
        equity_curve: &[(DateTime<Utc>, f64)],
        initial_balance: f64,
        final_balance: f64,
        signals: usize,
    ) -> Self {
        let start = equity_curve.first().map(|(t, _)| *t).unwrap_or_else(Utc::now);
        let end = equity_curve.last().map(|(t, _)| *t).unwrap_or(start);

        let (win_rate, profit_factor, expectancy) = trade_stats(outcomes);
        let wins: Vec<f64> = outcomes.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = outcomes.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();

        let values: Vec<f64> = equity_curve.iter().map(|(_, v)| *v).collect();
        let (max_drawdown, max_drawdown_pct) = max_drawdown(&values);

        let mut by_symbol: BTreeMap<String, SymbolStats> = BTreeMap::new();
        for t in outcomes {
            let s = by_symbol.entry(t.symbol.clone()).or_default();
            s.trades += 1;
            s.total_pnl += t.pnl;
            if t.pnl > 0.0 {
                s.wins += 1;
            } else if t.pnl < 0.0 {
                s.losses += 1;
            }
        }
        for s in by_symbol.values_mut() {
            s.win_rate = s.wins as f64 / s.trades as f64;
        }

        Self {
            start,
            end,
            initial_balance,
            final_balance,
            total_pnl: final_balance - initial_balance,
            trades: outcomes.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate,
            profit_factor,
            expectancy,
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: compute_sharpe(equity_curve),
            signals,
            by_symbol,
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  BACKTEST REPORT");
        println!("{}", "=".repeat(70));
        println!(
            "  Period:      {} to {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M"),
        );
        println!();
        println!("  PERFORMANCE");
        println!("  ───────────────────────────────────");
        println!("  Initial:     ${:.2}", self.initial_balance);
        println!("  Final:       ${:.2}", self.final_balance);
        println!("  PnL:         ${:+.2}", self.total_pnl);
        println!();
        println!("  TRADES");
        println!("  ───────────────────────────────────");
        println!("  Total:       {} ({}W / {}L)", self.trades, self.wins, self.losses);
        println!("  Win Rate:    {:.1}%", self.win_rate * 100.0);
        println!("  Avg Win:     ${:+.2}", self.avg_win);
        println!("  Avg Loss:    ${:+.2}", self.avg_loss);
        println!("  Expectancy:  ${:+.2}", self.expectancy);
        println!("  Profit Factor: {:.2}", self.profit_factor);
        println!();
        println!("  RISK");
        println!("  ───────────────────────────────────");
        println!("  Max DD:      ${:.2} ({:.1}%)", self.max_drawdown, self.max_drawdown_pct);
        println!("  Sharpe:      {:.2}", self.sharpe_ratio);
        println!();
        println!("  Signals:     {}", self.signals);

        if !self.by_symbol.is_empty() {
            println!();
            println!("  BY SYMBOL");
            println!("  ───────────────────────────────────");
            for (symbol, s) in &self.by_symbol {
                println!(
                    "  {:>10}: {} trades | WR {:.0}% | PnL ${:+.2}",
                    symbol,
                    s.trades,
                    s.win_rate * 100.0,
                    s.total_pnl
                );
            }
        }
        println!("{}", "=".repeat(70));
    }
}
