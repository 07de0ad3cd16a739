use crate::domain::repositories::RiskEventRepository;
use crate::domain::types::{RiskEvent, RiskLevel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteRiskEventRepository {
    pool: SqlitePool,
}

impl SqliteRiskEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskEventRepository for SqliteRiskEventRepository {
    async fn insert(&self, event: &RiskEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_events (ts, symbol, level, rule, details) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.ts)
        .bind(&event.symbol)
        .bind(event.level.to_string())
        .bind(&event.rule)
        .bind(&event.details)
        .execute(&self.pool)
        .await
        .context("Failed to insert risk event")?;
        Ok(())
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<RiskEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM risk_events WHERE symbol = ? ORDER BY ts DESC, id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RiskEvent {
                    ts: row.try_get("ts")?,
                    symbol: row.try_get("symbol")?,
                    level: RiskLevel::from_str(row.try_get::<String, _>("level")?.as_str())?,
                    rule: row.try_get("rule")?,
                    details: row.try_get("details")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteRiskEventRepository::new(db.pool);

        repo.insert(&RiskEvent {
            ts: 1,
            symbol: "BTC-USDT-SWAP".to_string(),
            level: RiskLevel::Block,
            rule: "LEVERAGE".to_string(),
            details: "5 > 3".to_string(),
        })
        .await
        .unwrap();

        let events = repo.recent("BTC-USDT-SWAP", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule, "LEVERAGE");
        assert_eq!(events[0].level, RiskLevel::Block);
    }
}
