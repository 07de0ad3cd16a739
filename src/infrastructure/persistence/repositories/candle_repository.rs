use crate::domain::repositories::CandleRepository;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::Candle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
        Ok(Candle {
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(row.try_get::<String, _>("timeframe")?.as_str())?,
            ts: row.try_get("ts")?,
            open: Decimal::from_str(row.try_get::<String, _>("open")?.as_str())?,
            high: Decimal::from_str(row.try_get::<String, _>("high")?.as_str())?,
            low: Decimal::from_str(row.try_get::<String, _>("low")?.as_str())?,
            close: Decimal::from_str(row.try_get::<String, _>("close")?.as_str())?,
            volume: Decimal::from_str(row.try_get::<String, _>("volume")?.as_str())?,
        })
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for candle in candles {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO candles (symbol, timeframe, ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.ts)
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to upsert candle")?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace_candles(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for candle in candles {
            let result = sqlx::query(
                r#"
                INSERT INTO candles (symbol, timeframe, ts, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timeframe, ts) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.ts)
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to replace candle")?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn latest_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT MAX(ts) AS ts FROM candles WHERE symbol = ? AND timeframe = ?")
            .bind(symbol)
            .bind(timeframe.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("ts")?)
    }

    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM candles WHERE symbol = ? AND timeframe = ?
                ORDER BY ts DESC LIMIT ?
            ) ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts <= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn stored_ts_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT ts FROM candles
            WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts <= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<i64, _>("ts").map_err(Into::into))
            .collect()
    }
}
