pub mod metrics;
pub mod runner;

pub use metrics::BacktestMetrics;
pub use runner::BacktestRunner;
