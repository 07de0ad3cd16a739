use crate::domain::backtest::{BacktestMetrics, BacktestTradeRow, EquityPoint};
use rust_decimal::prelude::ToPrimitive;

/// Computes the per-run metrics block from the equity curve and trade log.
/// Annualization derives from the timeframe's bars-per-year.
pub fn compute_metrics(
    equity_curve: &[EquityPoint],
    trades: &[BacktestTradeRow],
    initial_capital: f64,
    bars_per_year: f64,
    funding_pnl: f64,
) -> BacktestMetrics {
    let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial_capital);
    let total_return_pct = if initial_capital > 0.0 {
        (final_equity / initial_capital - 1.0) * 100.0
    } else {
        0.0
    };

    let bars = equity_curve.len().saturating_sub(1);
    let years = bars as f64 / bars_per_year;
    let cagr_pct = if years > 0.0 && initial_capital > 0.0 && final_equity > 0.0 {
        ((final_equity / initial_capital).powf(1.0 / years) - 1.0) * 100.0
    } else {
        0.0
    };

    // Max drawdown and its longest duration in bars.
    let mut max_drawdown = 0.0f64;
    let mut dd_duration = 0usize;
    let mut max_dd_duration = 0usize;
    for point in equity_curve {
        if point.drawdown > 0.0 {
            dd_duration += 1;
            max_dd_duration = max_dd_duration.max(dd_duration);
        } else {
            dd_duration = 0;
        }
        max_drawdown = max_drawdown.max(point.drawdown);
    }

    // Per-bar simple returns for the risk-adjusted ratios.
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| w[1].equity / w[0].equity - 1.0)
        .collect();
    let (sharpe, sortino) = risk_adjusted(&returns, bars_per_year);

    let max_drawdown_pct = max_drawdown * 100.0;
    let calmar = if max_drawdown_pct > 0.0 {
        cagr_pct / max_drawdown_pct
    } else {
        0.0
    };

    let pnls: Vec<f64> = trades
        .iter()
        .map(|t| t.pnl.to_f64().unwrap_or(0.0))
        .collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = if pnls.is_empty() {
        0.0
    } else {
        wins.len() as f64 / pnls.len() as f64
    };
    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| -l).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let avg_win = if wins.is_empty() {
        0.0
    } else {
        gross_win / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        gross_loss / losses.len() as f64
    };
    let payoff_ratio = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

    BacktestMetrics {
        total_return_pct,
        cagr_pct,
        max_drawdown_pct,
        max_drawdown_duration_bars: max_dd_duration,
        sharpe,
        sortino,
        calmar,
        win_rate,
        profit_factor,
        payoff_ratio,
        trades_count: trades.len(),
        funding_pnl,
        final_equity,
    }
}

fn risk_adjusted(returns: &[f64], bars_per_year: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    let annualizer = bars_per_year.sqrt();

    let sharpe = if std > 0.0 {
        mean / std * annualizer
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if downside.is_empty() {
        0.0
    } else {
        let downside_var = downside.iter().map(|r| r * r).sum::<f64>() / n;
        let downside_std = downside_var.sqrt();
        if downside_std > 0.0 {
            mean / downside_std * annualizer
        } else {
            0.0
        }
    };

    (sharpe, sortino)
}
