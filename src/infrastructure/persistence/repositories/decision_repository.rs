use crate::domain::regime::Regime;
use crate::domain::repositories::DecisionRepository;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Decision, LlmRun};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteDecisionRepository {
    pool: SqlitePool,
}

impl SqliteDecisionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DecisionRepository for SqliteDecisionRepository {
    async fn insert_decision(&self, decision: &Decision) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO decisions
                (ts, symbol, timeframe, regime, allocations_json, target_position, confidence,
                 reasoning, prompt_version, model_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(decision.ts)
        .bind(&decision.symbol)
        .bind(decision.timeframe.to_string())
        .bind(decision.regime.to_string())
        .bind(serde_json::to_string(&decision.allocations)?)
        .bind(decision.target_position)
        .bind(decision.confidence)
        .bind(&decision.reasoning)
        .bind(&decision.prompt_version)
        .bind(&decision.model_version)
        .execute(&self.pool)
        .await
        .context("Failed to insert decision")?;
        Ok(result.last_insert_rowid())
    }

    async fn recent_decisions(&self, symbol: &str, limit: usize) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE symbol = ? ORDER BY ts DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Decision {
                    ts: row.try_get("ts")?,
                    symbol: row.try_get("symbol")?,
                    timeframe: Timeframe::from_str(
                        row.try_get::<String, _>("timeframe")?.as_str(),
                    )?,
                    regime: Regime::from_str(row.try_get::<String, _>("regime")?.as_str())?,
                    allocations: serde_json::from_str(
                        row.try_get::<String, _>("allocations_json")?.as_str(),
                    )?,
                    target_position: row.try_get("target_position")?,
                    confidence: row.try_get("confidence")?,
                    reasoning: row.try_get("reasoning")?,
                    prompt_version: row.try_get("prompt_version")?,
                    model_version: row.try_get("model_version")?,
                })
            })
            .collect()
    }

    async fn record_llm_run(&self, run: &LlmRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_runs (ts, provider, model, prompt, response, latency_ms, outcome)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.ts)
        .bind(&run.provider)
        .bind(&run.model)
        .bind(&run.prompt)
        .bind(&run.response)
        .bind(run.latency_ms)
        .bind(&run.outcome)
        .execute(&self.pool)
        .await
        .context("Failed to record llm run")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Allocation;
    use crate::infrastructure::persistence::database::Database;

    #[tokio::test]
    async fn test_decision_roundtrip() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteDecisionRepository::new(db.pool);

        let decision = Decision {
            ts: 1000,
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: Timeframe::OneHour,
            regime: Regime::Trend,
            allocations: vec![Allocation {
                strategy_id: "ema_trend".to_string(),
                weight: 1.0,
                confidence: 0.8,
            }],
            target_position: 0.5,
            confidence: 0.8,
            reasoning: "trend following".to_string(),
            prompt_version: None,
            model_version: None,
        };
        repo.insert_decision(&decision).await.unwrap();

        let stored = repo.recent_decisions("BTC-USDT-SWAP", 5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], decision);
    }
}
