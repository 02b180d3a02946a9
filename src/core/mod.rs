pub mod atr;
pub mod error;
pub mod fib;
pub mod liquidity;
pub mod pd_arrays;
pub mod sessions;
pub mod smt;
pub mod structure;
pub mod swings;

pub use error::AnalysisError;
