pub mod backtesting;
pub mod bot;
pub mod broker;
pub mod config;
pub mod core;
pub mod models;
pub mod news;
pub mod persistence;
pub mod risk;
pub mod strategies;
#[cfg(test)]
pub mod test_helpers;
