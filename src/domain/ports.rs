use crate::domain::errors::VenueError;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{
    Balance, Candle, FundingRate, OrderIntent, OrderStatus, Position, PriceSnapshot,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Venue acknowledgment of a newly submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueOrderAck {
    pub exchange_order_id: String,
    pub status: OrderStatus,
}

/// Venue-side view of an order, used by the executor fill poll and the order
/// reconciliation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueOrderState {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub exchange_status: String,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub fee: Decimal,
    pub raw: serde_json::Value,
}

/// Abstracted venue capability set. One real implementation (OKX, HTTPS+HMAC,
/// demo or live endpoint) and one simulated (backtests and deterministic
/// tests). Rate limits surface as `VenueError::RateLimited` so calling loops
/// can back off.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError>;

    async fn fetch_funding(&self, symbol: &str) -> Result<FundingRate, VenueError>;

    async fn fetch_mark_index_last(&self, symbol: &str) -> Result<PriceSnapshot, VenueError>;

    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError>;

    async fn fetch_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, VenueError>;

    /// Submit with a caller-generated client order id. Resubmitting the same
    /// id must not place a second order.
    async fn submit_order(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
    ) -> Result<VenueOrderAck, VenueError>;

    async fn fetch_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<VenueOrderState, VenueError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrderState>, VenueError>;

    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> Result<(), VenueError>;
}

/// External allocation model. Failures degrade gracefully to the portfolio
/// scheduler; the adapter never blocks a decision cycle beyond its timeout.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Model identifier recorded on decisions and llm_runs rows.
    fn model_version(&self) -> String;

    async fn propose(&self, prompt: &str) -> anyhow::Result<serde_json::Value>;
}
