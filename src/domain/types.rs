use crate::domain::regime::Regime;
use crate::domain::timeframe::Timeframe;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One closed OHLCV bar. Immutable once persisted; repair may only replace a
/// row with authoritative values for the same `(symbol, timeframe, ts)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar open time, UTC epoch milliseconds, aligned to the bar grid.
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// OHLC sanity: low <= open,close <= high and non-negative volume.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
            && self.timeframe.is_bar_start(self.ts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub ts: i64,
    pub rate: Decimal,
    pub next_funding_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub ts: i64,
    pub last: Decimal,
    pub mark: Decimal,
    pub index: Decimal,
}

impl PriceSnapshot {
    /// Perp/index basis as a ratio: mark / index - 1.
    pub fn basis(&self) -> Option<Decimal> {
        if self.index.is_zero() {
            return None;
        }
        Some(self.mark / self.index - Decimal::ONE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => anyhow::bail!("Invalid order side: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            _ => anyhow::bail!("Invalid order type: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
        }
    }
}

impl FromStr for TimeInForce {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            _ => anyhow::bail!("Invalid time in force: {}", s),
        }
    }
}

/// Order lifecycle status. Progression is monotonic:
/// NEW -> ACCEPTED -> PARTIALLY_FILLED -> FILLED, with CANCELED, REJECTED and
/// EXPIRED as terminal exits. Terminal statuses are never succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Legal successor check for the order state machine. Repeated
    /// PARTIALLY_FILLED is allowed so that each incremental fill appends its
    /// own lifecycle event.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == OrderStatus::Expired {
            return true;
        }
        match self {
            OrderStatus::New => matches!(
                next,
                OrderStatus::Accepted | OrderStatus::Rejected | OrderStatus::Canceled
            ),
            OrderStatus::Accepted => matches!(
                next,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Canceled
                    | OrderStatus::Rejected
            ),
            OrderStatus::PartiallyFilled => matches!(
                next,
                OrderStatus::PartiallyFilled | OrderStatus::Filled | OrderStatus::Canceled
            ),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            _ => anyhow::bail!("Invalid order status: {}", s),
        }
    }
}

/// What the risk gate hands to the executor: a fully specified child order
/// before any ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub leverage: Decimal,
    pub time_in_force: TimeInForce,
    /// True when this order only closes existing exposure. Closes stay
    /// allowed under the daily-loss block.
    pub reduce_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub leverage: Decimal,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only record of one order state transition. Events are the source of
/// truth for reconstructing an order.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub order_id: String,
    pub status: OrderStatus,
    pub ts: i64,
    pub exchange_status: Option<String>,
    pub fill_qty: Option<Decimal>,
    pub fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub raw_payload: Option<serde_json::Value>,
}

impl LifecycleEvent {
    pub fn status_only(order_id: &str, status: OrderStatus, ts: i64) -> Self {
        Self {
            order_id: order_id.to_string(),
            status,
            ts,
            exchange_status: None,
            fill_qty: None,
            fill_price: None,
            fee: None,
            raw_payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub realized_pnl: Option<Decimal>,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
            PositionSide::Flat => write!(f, "FLAT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            "FLAT" | "NET" | "" => Ok(PositionSide::Flat),
            _ => anyhow::bail!("Invalid position side: {}", s),
        }
    }
}

/// Net-mode position for one symbol. At most one active position per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub unrealized_pnl: Decimal,
    pub margin: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub updated_at: i64,
}

impl Position {
    pub fn flat(symbol: &str, ts: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: PositionSide::Flat,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage: Decimal::ONE,
            unrealized_pnl: Decimal::ZERO,
            margin: Decimal::ZERO,
            liquidation_price: None,
            updated_at: ts,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat || self.size.is_zero()
    }

    /// Size with sign convention: long positive, short negative.
    pub fn signed_size(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.size,
            PositionSide::Short => -self.size,
            PositionSide::Flat => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub currency: String,
    pub total: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Info,
    Warn,
    Block,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Info => write!(f, "INFO"),
            RiskLevel::Warn => write!(f, "WARN"),
            RiskLevel::Block => write!(f, "BLOCK"),
        }
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(RiskLevel::Info),
            "WARN" => Ok(RiskLevel::Warn),
            "BLOCK" => Ok(RiskLevel::Block),
            _ => anyhow::bail!("Invalid risk level: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskEvent {
    pub ts: i64,
    pub symbol: String,
    pub level: RiskLevel,
    pub rule: String,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityKind {
    Gap,
    Duplicate,
    Repair,
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityKind::Gap => write!(f, "GAP"),
            IntegrityKind::Duplicate => write!(f, "DUPLICATE"),
            IntegrityKind::Repair => write!(f, "REPAIR"),
        }
    }
}

impl FromStr for IntegrityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GAP" => Ok(IntegrityKind::Gap),
            "DUPLICATE" => Ok(IntegrityKind::Duplicate),
            "REPAIR" => Ok(IntegrityKind::Repair),
            _ => anyhow::bail!("Invalid integrity event kind: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub kind: IntegrityKind,
    pub start_ts: i64,
    pub end_ts: i64,
    pub expected_bars: i64,
    pub actual_bars: i64,
    pub severity: RiskLevel,
    pub detected_at: i64,
    pub repair_job_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairStatus::Pending => "PENDING",
            RepairStatus::Running => "RUNNING",
            RepairStatus::Done => "DONE",
            RepairStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RepairStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(RepairStatus::Pending),
            "RUNNING" => Ok(RepairStatus::Running),
            "DONE" => Ok(RepairStatus::Done),
            "FAILED" => Ok(RepairStatus::Failed),
            _ => anyhow::bail!("Invalid repair job status: {}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairJob {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ts: i64,
    pub end_ts: i64,
    pub status: RepairStatus,
    pub repaired_bars: i64,
    pub message: Option<String>,
}

/// Directional intent emitted by a strategy for one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalIntent {
    Long,
    Short,
    Flat,
    CloseLong,
    CloseShort,
}

impl fmt::Display for SignalIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalIntent::Long => "LONG",
            SignalIntent::Short => "SHORT",
            SignalIntent::Flat => "FLAT",
            SignalIntent::CloseLong => "CLOSE_LONG",
            SignalIntent::CloseShort => "CLOSE_SHORT",
        };
        write!(f, "{}", s)
    }
}

/// Transient per-strategy output; never persisted on its own, only folded into
/// a `Decision`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySignal {
    pub strategy_id: String,
    pub ts: i64,
    pub intent: SignalIntent,
    /// In [0, 1].
    pub confidence: f64,
    /// Position sizing hint in [-1, 1], positive = long.
    pub target_weight: f64,
    pub stop: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reason: String,
}

impl StrategySignal {
    pub fn flat(strategy_id: &str, ts: i64, reason: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            ts,
            intent: SignalIntent::Flat,
            confidence: 0.0,
            target_weight: 0.0,
            stop: None,
            take_profit: None,
            reason: reason.into(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.intent == SignalIntent::Flat || self.target_weight == 0.0
    }
}

/// Audit row for one ingest pass over a `(symbol, timeframe)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRun {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub started_at: i64,
    pub finished_at: i64,
    pub rows_inserted: u64,
    pub status: String,
    pub error: Option<String>,
}

/// Audit row for one LLM allocation call: raw request, raw response, latency
/// and validation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRun {
    pub ts: i64,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub response: Option<String>,
    pub latency_ms: i64,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshotRow {
    pub exchange: String,
    pub account_id: String,
    pub ts: i64,
    pub total_equity: Decimal,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshotRow {
    pub exchange: String,
    pub account_id: String,
    pub ts: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub strategy_id: String,
    pub weight: f64,
    pub confidence: f64,
}

/// One persisted decision cycle output.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub ts: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub regime: Regime,
    pub allocations: Vec<Allocation>,
    /// Signed fraction of equity in [-1, 1].
    pub target_position: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub prompt_version: Option<String>,
    pub model_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: Timeframe::OneHour,
            ts: 1_704_067_200_000,
            open: Decimal::from_f64_retain(open).unwrap(),
            high: Decimal::from_f64_retain(high).unwrap(),
            low: Decimal::from_f64_retain(low).unwrap(),
            close: Decimal::from_f64_retain(close).unwrap(),
            volume: dec!(100),
        }
    }

    #[test]
    fn test_candle_validation() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_valid());
        // high below close
        assert!(!candle(100.0, 101.0, 95.0, 102.0).is_valid());
        // low above open
        assert!(!candle(100.0, 105.0, 101.0, 102.0).is_valid());

        let mut c = candle(100.0, 105.0, 95.0, 102.0);
        c.volume = dec!(-1);
        assert!(!c.is_valid());

        let mut c = candle(100.0, 105.0, 95.0, 102.0);
        c.ts += 1; // off the bar grid
        assert!(!c.is_valid());
    }

    #[test]
    fn test_order_status_transitions() {
        use OrderStatus::*;

        assert!(New.can_transition_to(Accepted));
        assert!(New.can_transition_to(Rejected));
        assert!(Accepted.can_transition_to(PartiallyFilled));
        assert!(Accepted.can_transition_to(Filled));
        assert!(PartiallyFilled.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(PartiallyFilled.can_transition_to(Canceled));

        // Skipping ACCEPTED is not legal.
        assert!(!New.can_transition_to(Filled));
        // Terminal statuses are never succeeded.
        assert!(!Filled.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(Accepted));
        assert!(!Rejected.can_transition_to(Expired));
        // Any non-terminal status may expire.
        assert!(New.can_transition_to(Expired));
        assert!(PartiallyFilled.can_transition_to(Expired));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            OrderStatus::New,
            OrderStatus::Accepted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert_eq!(
                OrderStatus::from_str(&status.to_string()).unwrap(),
                status
            );
        }
    }

    #[test]
    fn test_signed_size() {
        let mut pos = Position::flat("BTC-USDT-SWAP", 0);
        assert_eq!(pos.signed_size(), Decimal::ZERO);

        pos.side = PositionSide::Short;
        pos.size = dec!(0.5);
        assert_eq!(pos.signed_size(), dec!(-0.5));
    }

    #[test]
    fn test_basis() {
        let snap = PriceSnapshot {
            symbol: "BTC-USDT-SWAP".to_string(),
            ts: 0,
            last: dec!(50100),
            mark: dec!(50100),
            index: dec!(50000),
        };
        assert_eq!(snap.basis().unwrap(), dec!(0.002));
    }
}
