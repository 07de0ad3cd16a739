use crate::domain::repositories::IntegrityRepository;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{IntegrityEvent, IntegrityKind, RepairJob, RepairStatus, RiskLevel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteIntegrityRepository {
    pool: SqlitePool,
}

impl SqliteIntegrityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_job(row: &sqlx::sqlite::SqliteRow) -> Result<RepairJob> {
        Ok(RepairJob {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(row.try_get::<String, _>("timeframe")?.as_str())?,
            start_ts: row.try_get("start_ts")?,
            end_ts: row.try_get("end_ts")?,
            status: RepairStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
            repaired_bars: row.try_get("repaired_bars")?,
            message: row.try_get("message")?,
        })
    }
}

#[async_trait]
impl IntegrityRepository for SqliteIntegrityRepository {
    async fn insert_event(&self, event: &IntegrityEvent) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO integrity_events
                (symbol, timeframe, kind, start_ts, end_ts, expected_bars, actual_bars, severity, detected_at, repair_job_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.symbol)
        .bind(event.timeframe.to_string())
        .bind(event.kind.to_string())
        .bind(event.start_ts)
        .bind(event.end_ts)
        .bind(event.expected_bars)
        .bind(event.actual_bars)
        .bind(event.severity.to_string())
        .bind(event.detected_at)
        .bind(event.repair_job_id)
        .execute(&self.pool)
        .await
        .context("Failed to insert integrity event")?;
        Ok(result.last_insert_rowid())
    }

    async fn enqueue_repair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        // One active job per (symbol, timeframe, range).
        let existing = sqlx::query(
            r#"
            SELECT id FROM repair_jobs
            WHERE symbol = ? AND timeframe = ? AND start_ts = ? AND end_ts = ?
              AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(start_ts)
        .bind(end_ts)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO repair_jobs (symbol, timeframe, start_ts, end_ts, status, repaired_bars, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'PENDING', 0, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(start_ts)
        .bind(end_ts)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to enqueue repair job")?;

        tx.commit().await?;
        Ok(Some(result.last_insert_rowid()))
    }

    async fn next_pending_job(&self) -> Result<Option<RepairJob>> {
        // Oldest PENDING job whose key has nothing RUNNING, so refetches for
        // one (symbol, timeframe) never collide.
        let row = sqlx::query(
            r#"
            SELECT * FROM repair_jobs AS j
            WHERE j.status = 'PENDING'
              AND NOT EXISTS (
                  SELECT 1 FROM repair_jobs AS r
                  WHERE r.status = 'RUNNING'
                    AND r.symbol = j.symbol AND r.timeframe = j.timeframe
              )
            ORDER BY j.created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_job).transpose()
    }

    async fn update_job(
        &self,
        job_id: i64,
        status: RepairStatus,
        repaired_bars: i64,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE repair_jobs
            SET status = ?, repaired_bars = ?, message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(repaired_bars)
        .bind(message)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .context("Failed to update repair job")?;
        Ok(())
    }

    async fn events_for(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ts: i64,
    ) -> Result<Vec<IntegrityEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM integrity_events
            WHERE symbol = ? AND timeframe = ? AND detected_at >= ?
            ORDER BY detected_at ASC, id ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IntegrityEvent {
                    symbol: row.try_get("symbol")?,
                    timeframe: Timeframe::from_str(
                        row.try_get::<String, _>("timeframe")?.as_str(),
                    )?,
                    kind: IntegrityKind::from_str(row.try_get::<String, _>("kind")?.as_str())?,
                    start_ts: row.try_get("start_ts")?,
                    end_ts: row.try_get("end_ts")?,
                    expected_bars: row.try_get("expected_bars")?,
                    actual_bars: row.try_get("actual_bars")?,
                    severity: RiskLevel::from_str(row.try_get::<String, _>("severity")?.as_str())?,
                    detected_at: row.try_get("detected_at")?,
                    repair_job_id: row.try_get("repair_job_id")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;

    async fn repo() -> SqliteIntegrityRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteIntegrityRepository::new(db.pool)
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_active_range() {
        let repo = repo().await;
        let first = repo
            .enqueue_repair("BTC-USDT-SWAP", Timeframe::FifteenMin, 0, 900_000)
            .await
            .unwrap();
        assert!(first.is_some());

        let duplicate = repo
            .enqueue_repair("BTC-USDT-SWAP", Timeframe::FifteenMin, 0, 900_000)
            .await
            .unwrap();
        assert!(duplicate.is_none());

        // A finished job frees the range for a new one.
        repo.update_job(first.unwrap(), RepairStatus::Done, 2, None)
            .await
            .unwrap();
        let again = repo
            .enqueue_repair("BTC-USDT-SWAP", Timeframe::FifteenMin, 0, 900_000)
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_pending_jobs_serialize_per_key() {
        let repo = repo().await;
        let a = repo
            .enqueue_repair("BTC-USDT-SWAP", Timeframe::FifteenMin, 0, 900_000)
            .await
            .unwrap()
            .unwrap();
        repo.enqueue_repair("BTC-USDT-SWAP", Timeframe::FifteenMin, 900_000, 1_800_000)
            .await
            .unwrap()
            .unwrap();

        let next = repo.next_pending_job().await.unwrap().unwrap();
        assert_eq!(next.id, a);
        repo.update_job(a, RepairStatus::Running, 0, None).await.unwrap();

        // Same key is blocked while a job runs.
        assert!(repo.next_pending_job().await.unwrap().is_none());

        repo.update_job(a, RepairStatus::Done, 4, None).await.unwrap();
        let unblocked = repo.next_pending_job().await.unwrap();
        assert!(unblocked.is_some());
    }
}
