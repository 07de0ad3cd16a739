use crate::domain::repositories::{CandleRepository, MarketRepository};
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, FundingRate, PriceSnapshot};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

/// How many funding rows ride along in a snapshot; enough for the funding-arb
/// strategy's sustained-rate check.
const SNAPSHOT_FUNDING_ROWS: usize = 8;

/// Read-only facade over the store. This is the sole read path for
/// strategies, the decision pipeline and backtests; none of them issue SQL.
pub struct DataService {
    candles: Arc<dyn CandleRepository>,
    market: Arc<dyn MarketRepository>,
}

impl DataService {
    pub fn new(candles: Arc<dyn CandleRepository>, market: Arc<dyn MarketRepository>) -> Self {
        Self { candles, market }
    }

    /// Most recent `limit` closed candles, ascending. Returns what exists
    /// without padding.
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.candles.recent(symbol, timeframe, limit).await
    }

    pub async fn get_candles_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>> {
        self.candles.range(symbol, timeframe, start_ts, end_ts).await
    }

    pub async fn get_latest_funding(&self, symbol: &str) -> Result<Option<FundingRate>> {
        self.market.latest_funding(symbol).await
    }

    pub async fn get_latest_prices(&self, symbol: &str) -> Result<Option<PriceSnapshot>> {
        self.market.latest_prices(symbol).await
    }

    pub async fn get_funding_range(
        &self,
        symbol: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<FundingRate>> {
        self.market.funding_in_range(symbol, start_ts, end_ts).await
    }

    /// Assembles the immutable snapshot one decision cycle runs on.
    pub async fn get_snapshot(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<MarketSnapshot> {
        let candles = self.candles.recent(symbol, timeframe, limit).await?;
        let funding = self
            .market
            .recent_funding(symbol, SNAPSHOT_FUNDING_ROWS)
            .await?;
        let prices = self.market.latest_prices(symbol).await?;

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            timeframe,
            candles,
            funding,
            prices,
            as_of: Utc::now().timestamp_millis(),
        })
    }
}
