use crate::domain::repositories::AccountSnapshotRepository;
use crate::domain::types::{BalanceSnapshotRow, PositionSnapshotRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountSnapshotRepository for SqliteSnapshotRepository {
    async fn insert_balance_snapshot(&self, snapshot: &BalanceSnapshotRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balance_snapshots (exchange, account_id, ts, total_equity, raw_payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.exchange)
        .bind(&snapshot.account_id)
        .bind(snapshot.ts)
        .bind(snapshot.total_equity.to_string())
        .bind(snapshot.raw_payload.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert balance snapshot")?;
        Ok(())
    }

    async fn insert_position_snapshot(&self, snapshot: &PositionSnapshotRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO position_snapshots (exchange, account_id, ts, symbol, side, size, entry_price, raw_payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.exchange)
        .bind(&snapshot.account_id)
        .bind(snapshot.ts)
        .bind(&snapshot.symbol)
        .bind(snapshot.side.to_string())
        .bind(snapshot.size.to_string())
        .bind(snapshot.entry_price.to_string())
        .bind(snapshot.raw_payload.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert position snapshot")?;
        Ok(())
    }

    async fn latest_equity(&self, exchange: &str, account_id: &str) -> Result<Option<Decimal>> {
        let row = sqlx::query(
            r#"
            SELECT total_equity FROM balance_snapshots
            WHERE exchange = ? AND account_id = ?
            ORDER BY ts DESC LIMIT 1
            "#,
        )
        .bind(exchange)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Decimal::from_str(
                row.try_get::<String, _>("total_equity")?.as_str(),
            )?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[tokio::test]
    async fn test_latest_equity() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = SqliteSnapshotRepository::new(db.pool);

        for (ts, equity) in [(1000i64, dec!(10000)), (2000, dec!(10100))] {
            repo.insert_balance_snapshot(&BalanceSnapshotRow {
                exchange: "okx".to_string(),
                account_id: "demo".to_string(),
                ts,
                total_equity: equity,
                raw_payload: json!({"totalEq": equity.to_string()}),
            })
            .await
            .unwrap();
        }

        let latest = repo.latest_equity("okx", "demo").await.unwrap();
        assert_eq!(latest, Some(dec!(10100)));
        assert_eq!(repo.latest_equity("okx", "other").await.unwrap(), None);
    }
}
