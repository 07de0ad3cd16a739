pub mod backtest;
pub mod errors;
pub mod indicators;
pub mod ports;
pub mod regime;
pub mod repositories;
pub mod snapshot;
pub mod timeframe;
pub mod types;
