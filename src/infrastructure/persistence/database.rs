use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

struct Migration {
    version: i64,
    statements: &'static [&'static str],
}

/// Forward-only, numbered migrations. Each applies in its own transaction and
/// records itself in `schema_version`; a stored version this binary does not
/// know about is fatal.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        statements: &[
            r#"
            CREATE TABLE candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, ts)
            )
            "#,
            r#"
            CREATE TABLE funding_rates (
                symbol TEXT NOT NULL,
                ts INTEGER NOT NULL,
                rate TEXT NOT NULL,
                next_funding_ts INTEGER NOT NULL,
                PRIMARY KEY (symbol, ts)
            )
            "#,
            r#"
            CREATE TABLE price_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                ts INTEGER NOT NULL,
                last TEXT NOT NULL,
                mark TEXT NOT NULL,
                idx TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_price_snapshots_symbol_ts ON price_snapshots (symbol, ts)",
            r#"
            CREATE TABLE ingestion_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                rows_inserted INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        statements: &[
            r#"
            CREATE TABLE integrity_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                expected_bars INTEGER NOT NULL,
                actual_bars INTEGER NOT NULL,
                severity TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                repair_job_id INTEGER
            )
            "#,
            "CREATE INDEX idx_integrity_events_key ON integrity_events (symbol, timeframe, detected_at)",
            r#"
            CREATE TABLE repair_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                status TEXT NOT NULL,
                repaired_bars INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_repair_jobs_status ON repair_jobs (status, symbol, timeframe)",
        ],
    },
    Migration {
        version: 3,
        statements: &[
            r#"
            CREATE TABLE orders (
                id TEXT PRIMARY KEY,
                client_order_id TEXT NOT NULL UNIQUE,
                exchange_order_id TEXT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                price TEXT,
                amount TEXT NOT NULL,
                leverage TEXT NOT NULL,
                status TEXT NOT NULL,
                time_in_force TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_orders_symbol_status ON orders (symbol, status)",
            r#"
            CREATE TABLE order_lifecycle_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id TEXT NOT NULL,
                status TEXT NOT NULL,
                ts INTEGER NOT NULL,
                exchange_status TEXT,
                fill_qty TEXT,
                fill_price TEXT,
                fee TEXT,
                raw_payload TEXT
            )
            "#,
            "CREATE INDEX idx_lifecycle_order ON order_lifecycle_events (order_id, ts)",
            r#"
            CREATE TABLE trades (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                fee TEXT NOT NULL,
                fee_currency TEXT NOT NULL,
                realized_pnl TEXT,
                ts INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_trades_order ON trades (order_id)",
            "CREATE INDEX idx_trades_symbol_ts ON trades (symbol, ts)",
            r#"
            CREATE TABLE positions (
                symbol TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                leverage TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                margin TEXT NOT NULL,
                liquidation_price TEXT,
                updated_at INTEGER NOT NULL
            )
            "#,
        ],
    },
    Migration {
        version: 4,
        statements: &[
            r#"
            CREATE TABLE decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                regime TEXT NOT NULL,
                allocations_json TEXT NOT NULL,
                target_position REAL NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                prompt_version TEXT,
                model_version TEXT
            )
            "#,
            "CREATE INDEX idx_decisions_symbol_ts ON decisions (symbol, ts)",
            r#"
            CREATE TABLE llm_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT,
                latency_ms INTEGER NOT NULL,
                outcome TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE risk_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                level TEXT NOT NULL,
                rule TEXT NOT NULL,
                details TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_risk_events_symbol_ts ON risk_events (symbol, ts)",
        ],
    },
    Migration {
        version: 5,
        statements: &[
            r#"
            CREATE TABLE balance_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                account_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                total_equity TEXT NOT NULL,
                raw_payload TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_balance_snapshots_ts ON balance_snapshots (exchange, account_id, ts)",
            r#"
            CREATE TABLE position_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                account_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                raw_payload TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_position_snapshots_ts ON position_snapshots (symbol, ts)",
        ],
    },
    Migration {
        version: 6,
        statements: &[
            r#"
            CREATE TABLE backtest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                initial_capital TEXT NOT NULL,
                params_json TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                equity_curve_json TEXT NOT NULL,
                schema_version INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE backtest_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_ts INTEGER NOT NULL,
                exit_ts INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                amount TEXT NOT NULL,
                fees TEXT NOT NULL,
                pnl TEXT NOT NULL,
                return_pct TEXT NOT NULL,
                exit_reason TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_backtest_trades_run ON backtest_trades (run_id)",
            r#"
            CREATE TABLE backtest_positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_backtest_positions_run ON backtest_positions (run_id)",
            r#"
            CREATE TABLE backtest_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                regime TEXT NOT NULL,
                target_position REAL NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL
            )
            "#,
            "CREATE INDEX idx_backtest_decisions_run ON backtest_decisions (run_id)",
        ],
    },
];

/// Store handle: SQLite pool in WAL mode. Writers serialize through SQLite's
/// single-writer lock with a busy timeout; readers run concurrently.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .await
                        .context("Failed to create database directory")?;
                }
            }
        }

        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // In-memory databases are per-connection; a pool of one keeps every
        // reader on the same schema.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);
        Ok(Self { pool })
    }

    /// Applies pending migrations in ascending order, each inside its own
    /// transaction. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schema_version table")?;

        let rows = sqlx::query("SELECT version FROM schema_version ORDER BY version")
            .fetch_all(&self.pool)
            .await?;
        let applied: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("version"))
            .collect::<Result<_, _>>()?;

        let known: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        for v in &applied {
            if !known.contains(v) {
                bail!("Database has unknown schema version {} applied", v);
            }
        }

        for migration in MIGRATIONS {
            if applied.contains(&migration.version) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in migration.statements {
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Migration {} failed", migration.version))?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(migration.version)
                .bind(chrono::Utc::now().timestamp_millis())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!("Applied migration {:03}", migration.version);
        }

        Ok(())
    }

    /// Begin an explicit transaction for callers composing multi-table writes.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn schema_version(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT MAX(version) AS v FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("v")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let v1 = db.schema_version().await.unwrap();
        db.migrate().await.unwrap();
        let v2 = db.schema_version().await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1, Some(MIGRATIONS.last().unwrap().version));
    }

    #[tokio::test]
    async fn test_migrations_create_core_tables() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        for table in [
            "candles",
            "funding_rates",
            "orders",
            "order_lifecycle_events",
            "trades",
            "positions",
            "decisions",
            "risk_events",
            "repair_jobs",
            "backtest_runs",
        ] {
            let row =
                sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type='table' AND name=?")
                    .bind(table)
                    .fetch_one(&db.pool)
                    .await
                    .unwrap();
            let n: i64 = row.try_get("n").unwrap();
            assert_eq!(n, 1, "missing table {}", table);
        }
    }
}
