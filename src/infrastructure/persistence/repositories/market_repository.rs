use crate::domain::repositories::MarketRepository;
use crate::domain::types::{FundingRate, IngestionRun, PriceSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteMarketRepository {
    pool: SqlitePool,
}

impl SqliteMarketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_funding(row: &sqlx::sqlite::SqliteRow) -> Result<FundingRate> {
        Ok(FundingRate {
            symbol: row.try_get("symbol")?,
            ts: row.try_get("ts")?,
            rate: Decimal::from_str(row.try_get::<String, _>("rate")?.as_str())?,
            next_funding_ts: row.try_get("next_funding_ts")?,
        })
    }
}

#[async_trait]
impl MarketRepository for SqliteMarketRepository {
    async fn upsert_funding(&self, funding: &FundingRate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO funding_rates (symbol, ts, rate, next_funding_ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&funding.symbol)
        .bind(funding.ts)
        .bind(funding.rate.to_string())
        .bind(funding.next_funding_ts)
        .execute(&self.pool)
        .await
        .context("Failed to upsert funding rate")?;
        Ok(())
    }

    async fn latest_funding(&self, symbol: &str) -> Result<Option<FundingRate>> {
        let row = sqlx::query(
            "SELECT * FROM funding_rates WHERE symbol = ? ORDER BY ts DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_funding).transpose()
    }

    async fn recent_funding(&self, symbol: &str, limit: usize) -> Result<Vec<FundingRate>> {
        let rows = sqlx::query(
            "SELECT * FROM funding_rates WHERE symbol = ? ORDER BY ts DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_funding).collect()
    }

    async fn funding_in_range(
        &self,
        symbol: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<FundingRate>> {
        let rows = sqlx::query(
            "SELECT * FROM funding_rates WHERE symbol = ? AND ts >= ? AND ts <= ? ORDER BY ts ASC",
        )
        .bind(symbol)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_funding).collect()
    }

    async fn insert_price_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_snapshots (symbol, ts, last, mark, idx)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.symbol)
        .bind(snapshot.ts)
        .bind(snapshot.last.to_string())
        .bind(snapshot.mark.to_string())
        .bind(snapshot.index.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert price snapshot")?;
        Ok(())
    }

    async fn latest_prices(&self, symbol: &str) -> Result<Option<PriceSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM price_snapshots WHERE symbol = ? ORDER BY ts DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(PriceSnapshot {
                symbol: row.try_get("symbol")?,
                ts: row.try_get("ts")?,
                last: Decimal::from_str(row.try_get::<String, _>("last")?.as_str())?,
                mark: Decimal::from_str(row.try_get::<String, _>("mark")?.as_str())?,
                index: Decimal::from_str(row.try_get::<String, _>("idx")?.as_str())?,
            })),
            None => Ok(None),
        }
    }

    async fn record_ingestion_run(&self, run: &IngestionRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (symbol, timeframe, started_at, finished_at, rows_inserted, status, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.symbol)
        .bind(run.timeframe.to_string())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.rows_inserted as i64)
        .bind(&run.status)
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .context("Failed to record ingestion run")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    async fn repo() -> SqliteMarketRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteMarketRepository::new(db.pool)
    }

    #[tokio::test]
    async fn test_funding_roundtrip_and_ordering() {
        let repo = repo().await;
        for i in 0..3i64 {
            repo.upsert_funding(&FundingRate {
                symbol: "BTC-USDT-SWAP".to_string(),
                ts: i * 28_800_000,
                rate: dec!(0.0001) * Decimal::from(i + 1),
                next_funding_ts: (i + 1) * 28_800_000,
            })
            .await
            .unwrap();
        }

        let latest = repo.latest_funding("BTC-USDT-SWAP").await.unwrap().unwrap();
        assert_eq!(latest.ts, 2 * 28_800_000);
        assert_eq!(latest.rate, dec!(0.0003));

        let recent = repo.recent_funding("BTC-USDT-SWAP", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].ts > recent[1].ts);
    }

    #[tokio::test]
    async fn test_price_snapshot_latest() {
        let repo = repo().await;
        for i in 0..2i64 {
            repo.insert_price_snapshot(&PriceSnapshot {
                symbol: "BTC-USDT-SWAP".to_string(),
                ts: i * 1000,
                last: dec!(50000) + Decimal::from(i),
                mark: dec!(50001),
                index: dec!(49999),
            })
            .await
            .unwrap();
        }
        let latest = repo.latest_prices("BTC-USDT-SWAP").await.unwrap().unwrap();
        assert_eq!(latest.last, dec!(50001));
    }
}
