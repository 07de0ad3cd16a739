//! Repository trait seams between the application loops and the store.
//!
//! The store exclusively owns persisted rows; everything else holds transient
//! copies obtained through these traits. Orders are written only by the
//! executor and the reconciliation loop. Lifecycle events are append-only.

use crate::domain::backtest::{
    BacktestDecisionRow, BacktestPositionRow, BacktestRun, BacktestTradeRow,
};
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{
    BalanceSnapshotRow, Candle, Decision, FundingRate, IngestionRun, IntegrityEvent,
    LifecycleEvent, LlmRun, Order, Position, PositionSnapshotRow, PriceSnapshot, RepairJob,
    RepairStatus, RiskEvent, Trade,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert-or-ignore by `(symbol, timeframe, ts)`. Returns the number of
    /// rows actually inserted, which is how ingest idempotence is observed.
    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64>;

    /// Replace rows with authoritative values for the same key. Used only by
    /// the repair worker.
    async fn replace_candles(&self, candles: &[Candle]) -> Result<u64>;

    async fn latest_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>>;

    /// Most recent `limit` candles in ascending ts order.
    async fn recent(&self, symbol: &str, timeframe: Timeframe, limit: usize)
        -> Result<Vec<Candle>>;

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Candle>>;

    /// Stored bar timestamps within a range, ascending. Integrity scans
    /// compare this against the expected grid.
    async fn stored_ts_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<i64>>;
}

#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn upsert_funding(&self, funding: &FundingRate) -> Result<()>;

    async fn latest_funding(&self, symbol: &str) -> Result<Option<FundingRate>>;

    /// Recent funding rows, newest first. The funding-arb strategy reads the
    /// last few settlement periods through the data service.
    async fn recent_funding(&self, symbol: &str, limit: usize) -> Result<Vec<FundingRate>>;

    /// Funding rows inside a range, ascending. The backtest engine accrues
    /// funding from these.
    async fn funding_in_range(
        &self,
        symbol: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<FundingRate>>;

    async fn insert_price_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()>;

    async fn latest_prices(&self, symbol: &str) -> Result<Option<PriceSnapshot>>;

    async fn record_ingestion_run(&self, run: &IngestionRun) -> Result<()>;
}

#[async_trait]
pub trait IntegrityRepository: Send + Sync {
    async fn insert_event(&self, event: &IntegrityEvent) -> Result<i64>;

    /// Enqueue a PENDING repair job unless an active (PENDING or RUNNING) job
    /// already covers the same `(symbol, timeframe, range)`. Returns the job
    /// id, or None when deduplicated.
    async fn enqueue_repair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Option<i64>>;

    /// Next PENDING job whose `(symbol, timeframe)` has no RUNNING job, oldest
    /// first. Serializes repairs per key.
    async fn next_pending_job(&self) -> Result<Option<RepairJob>>;

    async fn update_job(
        &self,
        job_id: i64,
        status: RepairStatus,
        repaired_bars: i64,
        message: Option<&str>,
    ) -> Result<()>;

    async fn events_for(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ts: i64,
    ) -> Result<Vec<IntegrityEvent>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order together with its NEW lifecycle event in one
    /// transaction. For live orders this happens before the network call so
    /// retries stay idempotent.
    async fn insert_order(&self, order: &Order, event: &LifecycleEvent) -> Result<()>;

    /// Append a lifecycle event and advance the order status iff the new
    /// status is a legal successor; otherwise fails with
    /// `OrderStateError::InvalidTransition` and writes nothing.
    async fn append_event(&self, event: &LifecycleEvent) -> Result<()>;

    /// Fill path: lifecycle event + trade row + position row in the same
    /// transaction. Partial writes are forbidden.
    async fn record_fill(
        &self,
        event: &LifecycleEvent,
        trade: &Trade,
        position: &Position,
    ) -> Result<()>;

    async fn set_exchange_order_id(&self, order_id: &str, exchange_order_id: &str) -> Result<()>;

    async fn get(&self, order_id: &str) -> Result<Option<Order>>;

    async fn find_by_client_order_id(&self, client_order_id: &str) -> Result<Option<Order>>;

    /// All orders in a non-terminal status for the symbol.
    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn events_for(&self, order_id: &str) -> Result<Vec<LifecycleEvent>>;

    async fn trades_for(&self, order_id: &str) -> Result<Vec<Trade>>;

    async fn filled_amount(&self, order_id: &str) -> Result<Decimal>;

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;

    async fn upsert_position(&self, position: &Position) -> Result<()>;

    /// Most recent closing trades (realized_pnl set), newest first. Feeds the
    /// scheduler performance score, the cooldown rule and the daily-loss rule.
    async fn recent_closing_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>>;

    async fn realized_pnl_since(&self, symbol: &str, since_ts: i64) -> Result<Decimal>;
}

#[async_trait]
pub trait DecisionRepository: Send + Sync {
    async fn insert_decision(&self, decision: &Decision) -> Result<i64>;

    async fn recent_decisions(&self, symbol: &str, limit: usize) -> Result<Vec<Decision>>;

    async fn record_llm_run(&self, run: &LlmRun) -> Result<()>;
}

#[async_trait]
pub trait RiskEventRepository: Send + Sync {
    async fn insert(&self, event: &RiskEvent) -> Result<()>;

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<RiskEvent>>;
}

#[async_trait]
pub trait AccountSnapshotRepository: Send + Sync {
    async fn insert_balance_snapshot(&self, snapshot: &BalanceSnapshotRow) -> Result<()>;

    async fn insert_position_snapshot(&self, snapshot: &PositionSnapshotRow) -> Result<()>;

    async fn latest_equity(&self, exchange: &str, account_id: &str) -> Result<Option<Decimal>>;
}

#[async_trait]
pub trait BacktestRepository: Send + Sync {
    /// One backtest run plus all children, atomically.
    async fn insert_run(
        &self,
        run: &BacktestRun,
        trades: &[BacktestTradeRow],
        positions: &[BacktestPositionRow],
        decisions: &[BacktestDecisionRow],
    ) -> Result<i64>;

    async fn get_run(&self, run_id: &str) -> Result<Option<BacktestRun>>;
}
