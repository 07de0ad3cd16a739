use crate::domain::backtest::{
    BacktestDecisionRow, BacktestPositionRow, BacktestRun, BacktestTradeRow,
};
use crate::domain::repositories::BacktestRepository;
use crate::domain::timeframe::Timeframe;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteBacktestRepository {
    pool: SqlitePool,
}

impl SqliteBacktestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BacktestRepository for SqliteBacktestRepository {
    async fn insert_run(
        &self,
        run: &BacktestRun,
        trades: &[BacktestTradeRow],
        positions: &[BacktestPositionRow],
        decisions: &[BacktestDecisionRow],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO backtest_runs
                (run_id, created_at, symbol, timeframe, start_ts, end_ts, initial_capital,
                 params_json, metrics_json, equity_curve_json, schema_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.created_at)
        .bind(&run.symbol)
        .bind(run.timeframe.to_string())
        .bind(run.start_ts)
        .bind(run.end_ts)
        .bind(run.initial_capital.to_string())
        .bind(run.params_json.to_string())
        .bind(run.metrics_json.to_string())
        .bind(run.equity_curve_json.to_string())
        .bind(run.schema_version)
        .execute(&mut *tx)
        .await
        .context("Failed to insert backtest run")?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO backtest_trades
                    (run_id, strategy_id, side, entry_ts, exit_ts, entry_price, exit_price,
                     amount, fees, pnl, return_pct, exit_reason)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run.run_id)
            .bind(&trade.strategy_id)
            .bind(trade.side.to_string())
            .bind(trade.entry_ts)
            .bind(trade.exit_ts)
            .bind(trade.entry_price.to_string())
            .bind(trade.exit_price.to_string())
            .bind(trade.amount.to_string())
            .bind(trade.fees.to_string())
            .bind(trade.pnl.to_string())
            .bind(trade.return_pct.to_string())
            .bind(&trade.exit_reason)
            .execute(&mut *tx)
            .await
            .context("Failed to insert backtest trade")?;
        }

        for position in positions {
            sqlx::query(
                r#"
                INSERT INTO backtest_positions (run_id, ts, side, size, entry_price)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run.run_id)
            .bind(position.ts)
            .bind(position.side.to_string())
            .bind(position.size.to_string())
            .bind(position.entry_price.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert backtest position")?;
        }

        for decision in decisions {
            sqlx::query(
                r#"
                INSERT INTO backtest_decisions (run_id, ts, regime, target_position, confidence, reasoning)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&run.run_id)
            .bind(decision.ts)
            .bind(&decision.regime)
            .bind(decision.target_position)
            .bind(decision.confidence)
            .bind(&decision.reasoning)
            .execute(&mut *tx)
            .await
            .context("Failed to insert backtest decision")?;
        }

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<BacktestRun>> {
        let row = sqlx::query("SELECT * FROM backtest_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(BacktestRun {
                run_id: row.try_get("run_id")?,
                created_at: row.try_get("created_at")?,
                symbol: row.try_get("symbol")?,
                timeframe: Timeframe::from_str(row.try_get::<String, _>("timeframe")?.as_str())?,
                start_ts: row.try_get("start_ts")?,
                end_ts: row.try_get("end_ts")?,
                initial_capital: Decimal::from_str(
                    row.try_get::<String, _>("initial_capital")?.as_str(),
                )?,
                params_json: serde_json::from_str(
                    row.try_get::<String, _>("params_json")?.as_str(),
                )?,
                metrics_json: serde_json::from_str(
                    row.try_get::<String, _>("metrics_json")?.as_str(),
                )?,
                equity_curve_json: serde_json::from_str(
                    row.try_get::<String, _>("equity_curve_json")?.as_str(),
                )?,
                schema_version: row.try_get("schema_version")?,
            })),
            None => Ok(None),
        }
    }
}
