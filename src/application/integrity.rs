use crate::domain::ports::VenueAdapter;
use crate::domain::repositories::{CandleRepository, IntegrityRepository};
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{IntegrityEvent, IntegrityKind, RepairStatus, RiskLevel};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

fn gap_severity(missing_bars: i64) -> RiskLevel {
    match missing_bars {
        0..=2 => RiskLevel::Info,
        3..=20 => RiskLevel::Warn,
        _ => RiskLevel::Block,
    }
}

/// Scans stored candles against the expected bar grid and records integrity
/// events. Holes become repair jobs for the repair worker.
pub struct IntegrityScanner {
    candles: Arc<dyn CandleRepository>,
    integrity: Arc<dyn IntegrityRepository>,
}

impl IntegrityScanner {
    pub fn new(
        candles: Arc<dyn CandleRepository>,
        integrity: Arc<dyn IntegrityRepository>,
    ) -> Self {
        Self { candles, integrity }
    }

    /// Scans one `(symbol, timeframe)` over `range` (or the full stored span
    /// when None). Emits one GAP event per contiguous missing range and one
    /// DUPLICATE event per row that collides with the bar grid. Each gap also
    /// enqueues a repair job, deduplicated per active range.
    pub async fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        range: Option<(i64, i64)>,
    ) -> Result<Vec<IntegrityEvent>> {
        let (start_ts, end_ts) = match range {
            Some(range) => range,
            None => {
                let stored = self
                    .candles
                    .stored_ts_in_range(symbol, timeframe, 0, i64::MAX)
                    .await?;
                match (stored.first(), stored.last()) {
                    (Some(first), Some(last)) => (*first, *last),
                    _ => return Ok(Vec::new()),
                }
            }
        };

        let stored = self
            .candles
            .stored_ts_in_range(symbol, timeframe, start_ts, end_ts)
            .await?;
        let stored_set: HashSet<i64> = stored.iter().copied().collect();
        let expected = timeframe.bar_grid(start_ts, end_ts);
        let detected_at = Utc::now().timestamp_millis();

        let mut events = Vec::new();

        // Off-grid rows are the only collision observable under the unique
        // (symbol, timeframe, ts) key.
        for ts in &stored {
            if !timeframe.is_bar_start(*ts) {
                let event = IntegrityEvent {
                    symbol: symbol.to_string(),
                    timeframe,
                    kind: IntegrityKind::Duplicate,
                    start_ts: *ts,
                    end_ts: *ts,
                    expected_bars: 0,
                    actual_bars: 1,
                    severity: RiskLevel::Warn,
                    detected_at,
                    repair_job_id: None,
                };
                self.integrity.insert_event(&event).await?;
                events.push(event);
            }
        }

        // Contiguous missing runs on the grid.
        let step = timeframe.duration_ms();
        let mut gap_start: Option<i64> = None;
        let mut last_missing = 0i64;
        let mut gaps: Vec<(i64, i64)> = Vec::new();
        for ts in &expected {
            if stored_set.contains(ts) {
                if let Some(start) = gap_start.take() {
                    gaps.push((start, last_missing));
                }
            } else {
                if gap_start.is_none() {
                    gap_start = Some(*ts);
                }
                last_missing = *ts;
            }
        }
        if let Some(start) = gap_start {
            gaps.push((start, last_missing));
        }

        for (gap_start_ts, gap_end_ts) in gaps {
            let missing_bars = (gap_end_ts - gap_start_ts) / step + 1;
            let repair_job_id = self
                .integrity
                .enqueue_repair(symbol, timeframe, gap_start_ts, gap_end_ts)
                .await?;
            let event = IntegrityEvent {
                symbol: symbol.to_string(),
                timeframe,
                kind: IntegrityKind::Gap,
                start_ts: gap_start_ts,
                end_ts: gap_end_ts,
                expected_bars: missing_bars,
                actual_bars: 0,
                severity: gap_severity(missing_bars),
                detected_at,
                repair_job_id,
            };
            self.integrity.insert_event(&event).await?;
            warn!(
                "Gap detected for {} {}: {} bars [{}, {}]",
                symbol, timeframe, missing_bars, gap_start_ts, gap_end_ts
            );
            events.push(event);
        }

        Ok(events)
    }

    pub async fn scan_all(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        range: Option<(i64, i64)>,
    ) -> Result<Vec<IntegrityEvent>> {
        let mut events = Vec::new();
        for timeframe in timeframes {
            events.extend(self.scan(symbol, *timeframe, range).await?);
        }
        Ok(events)
    }
}

/// Dequeues PENDING repair jobs one at a time per `(symbol, timeframe)` and
/// refetches the missing range through the venue.
pub struct RepairWorker {
    venue: Arc<dyn VenueAdapter>,
    candles: Arc<dyn CandleRepository>,
    integrity: Arc<dyn IntegrityRepository>,
    batch_size: usize,
}

impl RepairWorker {
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        candles: Arc<dyn CandleRepository>,
        integrity: Arc<dyn IntegrityRepository>,
        batch_size: usize,
    ) -> Self {
        Self {
            venue,
            candles,
            integrity,
            batch_size,
        }
    }

    /// Processes at most one job. Returns whether a job was picked up.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.integrity.next_pending_job().await? else {
            return Ok(false);
        };

        self.integrity
            .update_job(job.id, RepairStatus::Running, 0, None)
            .await?;

        match self.repair(&job.symbol, job.timeframe, job.start_ts, job.end_ts).await {
            Ok(repaired_bars) => {
                self.integrity
                    .update_job(job.id, RepairStatus::Done, repaired_bars, None)
                    .await?;
                self.integrity
                    .insert_event(&IntegrityEvent {
                        symbol: job.symbol.clone(),
                        timeframe: job.timeframe,
                        kind: IntegrityKind::Repair,
                        start_ts: job.start_ts,
                        end_ts: job.end_ts,
                        expected_bars: (job.end_ts - job.start_ts) / job.timeframe.duration_ms()
                            + 1,
                        actual_bars: repaired_bars,
                        severity: RiskLevel::Info,
                        detected_at: Utc::now().timestamp_millis(),
                        repair_job_id: Some(job.id),
                    })
                    .await?;
                info!(
                    "Repaired {} bars for {} {} [{}, {}]",
                    repaired_bars, job.symbol, job.timeframe, job.start_ts, job.end_ts
                );
            }
            Err(e) => {
                warn!("Repair job {} failed: {:#}", job.id, e);
                self.integrity
                    .update_job(job.id, RepairStatus::Failed, 0, Some(&format!("{:#}", e)))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn repair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<i64> {
        let step = timeframe.duration_ms();
        let mut since = start_ts;
        let mut repaired = 0i64;

        while since <= end_ts {
            let batch = self
                .venue
                .fetch_ohlcv(symbol, timeframe, since, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            let last_ts = batch.last().map(|c| c.ts).unwrap_or(since);
            let in_range: Vec<_> = batch
                .into_iter()
                .filter(|c| c.ts >= start_ts && c.ts <= end_ts && c.is_valid())
                .collect();
            repaired += self.candles.replace_candles(&in_range).await? as i64;
            if last_ts < since {
                break;
            }
            since = last_ts + step;
        }
        Ok(repaired)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Repair worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Drain the queue, one serialized job at a time.
                    loop {
                        match self.run_once().await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                warn!("Repair worker tick failed: {:#}", e);
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Repair worker stopping");
                        return;
                    }
                }
            }
        }
    }
}
