use crate::domain::errors::VenueError;
use crate::domain::ports::VenueAdapter;
use crate::domain::repositories::{CandleRepository, MarketRepository, RiskEventRepository};
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, IngestionRun, RiskEvent, RiskLevel};
use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    pub initial_backfill_days: i64,
    pub batch_size: usize,
    pub interval_secs: u64,
    pub max_retries: usize,
}

/// Pulls closed candles and derivative data from the venue into the store.
/// Upserts are insert-or-ignore, so overlapping fetches and restarts are
/// harmless.
pub struct IngestWorker {
    venue: Arc<dyn VenueAdapter>,
    candles: Arc<dyn CandleRepository>,
    market: Arc<dyn MarketRepository>,
    risk_events: Arc<dyn RiskEventRepository>,
    config: IngestConfig,
}

impl IngestWorker {
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        candles: Arc<dyn CandleRepository>,
        market: Arc<dyn MarketRepository>,
        risk_events: Arc<dyn RiskEventRepository>,
        config: IngestConfig,
    ) -> Self {
        Self {
            venue,
            candles,
            market,
            risk_events,
            config,
        }
    }

    /// One full pass over all configured timeframes. Used by the `ingest` CLI
    /// command and by every daemon tick.
    pub async fn ingest_all(&self) -> Result<u64> {
        let mut total = 0u64;
        for timeframe in self.config.timeframes.clone() {
            match self.ingest_timeframe(timeframe).await {
                Ok(inserted) => total += inserted,
                Err(e) => {
                    error!("Ingest failed for {} {}: {:#}", self.config.symbol, timeframe, e);
                    self.risk_events
                        .insert(&RiskEvent {
                            ts: Utc::now().timestamp_millis(),
                            symbol: self.config.symbol.clone(),
                            level: RiskLevel::Warn,
                            rule: "INGEST_STALL".to_string(),
                            details: format!("{} {}: {:#}", self.config.symbol, timeframe, e),
                        })
                        .await?;
                }
            }
        }
        Ok(total)
    }

    /// Backfill-then-tail for one timeframe. The currently forming bar is
    /// never persisted; only bars whose close time has passed.
    pub async fn ingest_timeframe(&self, timeframe: Timeframe) -> Result<u64> {
        let symbol = &self.config.symbol;
        let started_at = Utc::now().timestamp_millis();
        let bar_ms = timeframe.duration_ms();

        let mut since = match self.candles.latest_ts(symbol, timeframe).await? {
            Some(latest) => latest + bar_ms,
            None => {
                let lookback = self.config.initial_backfill_days * 86_400_000;
                timeframe.bar_start(started_at - lookback)
            }
        };

        let mut inserted = 0u64;
        let mut error: Option<String> = None;

        loop {
            let now = Utc::now().timestamp_millis();
            if since + bar_ms > now {
                break;
            }

            let batch = match self
                .fetch_with_retry(symbol, timeframe, since, self.config.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error = Some(format!("{}", e));
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let closed: Vec<Candle> = batch
                .into_iter()
                .filter(|c| c.ts + bar_ms <= now)
                .filter(|c| {
                    let valid = c.is_valid();
                    if !valid {
                        warn!("Dropping invalid candle {} {} ts={}", c.symbol, c.timeframe, c.ts);
                    }
                    valid
                })
                .collect();
            if closed.is_empty() {
                break;
            }

            let last_ts = closed.last().map(|c| c.ts).unwrap_or(since);
            inserted += self.candles.upsert_candles(&closed).await?;
            since = last_ts + bar_ms;
        }

        let run = IngestionRun {
            symbol: symbol.clone(),
            timeframe,
            started_at,
            finished_at: Utc::now().timestamp_millis(),
            rows_inserted: inserted,
            status: if error.is_none() { "OK" } else { "FAILED" }.to_string(),
            error: error.clone(),
        };
        self.market.record_ingestion_run(&run).await?;

        if let Some(e) = error {
            anyhow::bail!("Ingest stalled after retries: {}", e);
        }
        debug!("Ingested {} bars for {} {}", inserted, symbol, timeframe);
        Ok(inserted)
    }

    /// Funding and mark/index/last run on their own cadence, independent of
    /// the candle tail.
    pub async fn ingest_derivatives(&self) -> Result<()> {
        let symbol = &self.config.symbol;

        match self.venue.fetch_funding(symbol).await {
            Ok(funding) => self.market.upsert_funding(&funding).await?,
            Err(e) => warn!("Funding fetch failed for {}: {}", symbol, e),
        }
        match self.venue.fetch_mark_index_last(symbol).await {
            Ok(prices) => self.market.insert_price_snapshot(&prices).await?,
            Err(e) => warn!("Price snapshot fetch failed for {}: {}", symbol, e),
        }
        Ok(())
    }

    /// Exponential backoff with jitter around the venue call. Rate limits use
    /// the venue-provided delay.
    async fn fetch_with_retry(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError> {
        let mut attempt = 0usize;
        loop {
            match self.venue.fetch_ohlcv(symbol, timeframe, since, limit).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = match &e {
                        VenueError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs)
                        }
                        _ => {
                            let base = 500u64 * (1 << attempt.min(6)) as u64;
                            let jitter = rand::rng().random_range(0..250);
                            Duration::from_millis(base + jitter)
                        }
                    };
                    warn!(
                        "Venue fetch failed (attempt {}): {}; retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cooperative ingest loop. Candles every tick, derivatives on the same
    /// cadence; both isolated so a venue outage here never stops other loops.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "Ingest loop started for {} ({:?})",
            self.config.symbol, self.config.timeframes
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.ingest_all().await {
                        error!("Ingest tick failed: {:#}", e);
                    }
                    if let Err(e) = self.ingest_derivatives().await {
                        error!("Derivative ingest failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Ingest loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        SqliteCandleRepository, SqliteMarketRepository, SqliteRiskEventRepository,
    };
    use crate::infrastructure::sim::SimVenue;
    use rust_decimal_macros::dec;

    fn candle(tf: Timeframe, ts: i64) -> Candle {
        Candle {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: tf,
            ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
        }
    }

    async fn worker(venue: Arc<SimVenue>) -> (IngestWorker, Arc<SqliteCandleRepository>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
        let market = Arc::new(SqliteMarketRepository::new(db.pool.clone()));
        let risk = Arc::new(SqliteRiskEventRepository::new(db.pool.clone()));
        let config = IngestConfig {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframes: vec![Timeframe::FifteenMin],
            initial_backfill_days: 1,
            batch_size: 300,
            interval_secs: 60,
            max_retries: 2,
        };
        (
            IngestWorker::new(venue, candles.clone(), market, risk, config),
            candles,
        )
    }

    #[tokio::test]
    async fn test_forming_bar_is_never_persisted() {
        let tf = Timeframe::FifteenMin;
        let venue = Arc::new(SimVenue::new());
        let now = Utc::now().timestamp_millis();
        let current_bar = tf.bar_start(now);

        // Three closed bars plus the currently forming one.
        venue.seed_candles(vec![
            candle(tf, current_bar - 3 * tf.duration_ms()),
            candle(tf, current_bar - 2 * tf.duration_ms()),
            candle(tf, current_bar - tf.duration_ms()),
            candle(tf, current_bar),
        ]);

        let (worker, candles) = worker(venue).await;
        let inserted = worker.ingest_timeframe(tf).await.unwrap();
        assert_eq!(inserted, 3);

        let stored = candles
            .recent("BTC-USDT-SWAP", tf, 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|c| c.ts < current_bar));
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let tf = Timeframe::FifteenMin;
        let venue = Arc::new(SimVenue::new());
        let now = Utc::now().timestamp_millis();
        let current_bar = tf.bar_start(now);
        venue.seed_candles(
            (1..=5)
                .map(|i| candle(tf, current_bar - i * tf.duration_ms()))
                .collect(),
        );

        let (worker, candles) = worker(venue).await;
        let first = worker.ingest_timeframe(tf).await.unwrap();
        assert_eq!(first, 5);
        let second = worker.ingest_timeframe(tf).await.unwrap();
        assert_eq!(second, 0);

        let stored = candles.recent("BTC-USDT-SWAP", tf, 10).await.unwrap();
        assert_eq!(stored.len(), 5);
    }
}
