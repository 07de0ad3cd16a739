use crate::domain::types::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Venue adapter error taxonomy. The split matters: transient errors are
/// retried with backoff, permanent errors surface to the originating decision
/// as REJECTED without retry.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("Rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Transient venue error: {0}")]
    Transient(String),

    #[error("Venue timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Permanent venue error: {0}")]
    Permanent(String),

    #[error("Order not found: {client_order_id}")]
    OrderNotFound { client_order_id: String },
}

impl VenueError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::RateLimited { .. } | VenueError::Transient(_) | VenueError::Timeout { .. }
        )
    }
}

/// Invariant violations in the order state machine. These are fatal for the
/// offending transition; no silent recovery.
#[derive(Debug, Error)]
pub enum OrderStateError {
    #[error("Invalid order transition {from} -> {to} for order {order_id}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Non-monotonic lifecycle timestamp for order {order_id}: {ts} < {last_ts}")]
    NonMonotonicTimestamp {
        order_id: String,
        ts: i64,
        last_ts: i64,
    },
}

/// Risk gate rejections. Every variant maps to one persisted
/// `RiskEvent(BLOCK, rule)` row; `rule_code` is the persisted rule name.
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("Trading disabled by kill switch")]
    TradingDisabled,

    #[error("Confidence {confidence:.2} below minimum {min:.2}")]
    MinConfidence { confidence: f64, min: f64 },

    #[error("Gross notional {notional} exceeds limit {max}")]
    MaxNotional { notional: Decimal, max: Decimal },

    #[error("Leverage {leverage} exceeds limit {max}")]
    Leverage { leverage: Decimal, max: Decimal },

    #[error("Daily realized loss {loss_pct:.2}% crossed limit {limit_pct:.2}%, new opens blocked")]
    DailyLoss { loss_pct: f64, limit_pct: f64 },

    #[error("Cooldown active after {losses} consecutive losses, {bars_left} bars remaining")]
    Cooldown { losses: usize, bars_left: usize },

    #[error("Position already open for {symbol}; one position per symbol")]
    ExclusivePosition { symbol: String },
}

impl RiskViolation {
    pub fn rule_code(&self) -> &'static str {
        match self {
            RiskViolation::TradingDisabled => "TRADING_DISABLED",
            RiskViolation::MinConfidence { .. } => "MIN_CONFIDENCE",
            RiskViolation::MaxNotional { .. } => "MAX_NOTIONAL",
            RiskViolation::Leverage { .. } => "LEVERAGE",
            RiskViolation::DailyLoss { .. } => "DAILY_LOSS",
            RiskViolation::Cooldown { .. } => "COOLDOWN",
            RiskViolation::ExclusivePosition { .. } => "EXCLUSIVE_POSITION",
        }
    }
}
