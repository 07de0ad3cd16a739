//! Persisted backtest entities and the metrics block computed per run.

use crate::domain::timeframe::Timeframe;
use crate::domain::types::{PositionSide, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const BACKTEST_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRun {
    pub run_id: String,
    pub created_at: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ts: i64,
    pub end_ts: i64,
    pub initial_capital: Decimal,
    pub params_json: serde_json::Value,
    pub metrics_json: serde_json::Value,
    pub equity_curve_json: serde_json::Value,
    pub schema_version: i64,
}

/// One closed (or force-closed at end of data) trade in a run.
/// `return_pct` is a ratio, not a percent; conversion happens at the display
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTradeRow {
    pub strategy_id: String,
    pub side: Side,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub amount: Decimal,
    pub fees: Decimal,
    pub pnl: Decimal,
    pub return_pct: Decimal,
    pub exit_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestPositionRow {
    pub ts: i64,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestDecisionRow {
    pub ts: i64,
    pub regime: String,
    pub target_position: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: i64,
    pub equity: f64,
    /// Relative distance from the running equity peak, >= 0.
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return_pct: f64,
    pub cagr_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration_bars: usize,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub payoff_ratio: f64,
    pub trades_count: usize,
    pub funding_pnl: f64,
    pub final_equity: f64,
}
