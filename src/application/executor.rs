use crate::application::data_service::DataService;
use crate::application::risk_gate::OrderPlan;
use crate::domain::errors::VenueError;
use crate::domain::ports::{VenueAdapter, VenueOrderState};
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{
    LifecycleEvent, Order, OrderIntent, OrderStatus, OrderType, Position, PositionSide, Side,
    TimeInForce, Trade,
};
use crate::infrastructure::sim::{FeeSchedule, SlippageModel};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum tradable quantity; deltas below this are treated as zero.
const MIN_ORDER_QTY: &str = "0.0001";

/// Translates a decision's target weight into the child order(s) needed to
/// get there from the current position. The scheduler's exclusivity rule
/// guarantees a sign flip has already been reduced to a full close, so one
/// child order always suffices.
pub fn plan_child_orders(
    symbol: &str,
    target_weight: f64,
    current: Option<&Position>,
    equity: Decimal,
    price: Decimal,
    leverage: Decimal,
    time_in_force: TimeInForce,
    live_routing: bool,
) -> Result<OrderPlan> {
    if price <= Decimal::ZERO {
        bail!("Cannot plan orders without a positive reference price");
    }
    let min_qty = Decimal::from_str_exact(MIN_ORDER_QTY).expect("const parses");

    let current_qty = current.map(|p| p.signed_size()).unwrap_or(Decimal::ZERO);
    let target_qty = Decimal::from_f64(target_weight).unwrap_or_default() * equity / price;
    let delta = target_qty - current_qty;

    let mut intents = Vec::new();
    if delta.abs() >= min_qty {
        let side = if delta > Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        };
        let reduce_only = target_qty.abs() < current_qty.abs()
            && (target_qty.is_zero() || target_qty.signum() == current_qty.signum());
        intents.push(OrderIntent {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            amount: delta.abs(),
            leverage,
            time_in_force,
            reduce_only,
        });
    }

    Ok(OrderPlan {
        intents,
        target_weight,
        gross_notional: target_qty.abs() * price,
        leverage,
        is_increasing: target_qty.abs() > current_qty.abs(),
        live_routing,
    })
}

/// Folds one fill into the net position. Returns the updated position and the
/// realized PnL of whatever portion was closed.
pub fn apply_fill(
    current: Option<Position>,
    symbol: &str,
    side: Side,
    qty: Decimal,
    price: Decimal,
    leverage: Decimal,
    ts: i64,
) -> (Position, Option<Decimal>) {
    let mut position = current.unwrap_or_else(|| Position::flat(symbol, ts));
    let signed_fill = match side {
        Side::Buy => qty,
        Side::Sell => -qty,
    };
    let current_signed = position.signed_size();
    let new_signed = current_signed + signed_fill;

    let mut realized = None;

    let same_direction = current_signed.is_zero()
        || signed_fill.is_zero()
        || current_signed.signum() == signed_fill.signum();

    if same_direction {
        // Extending (or opening): weighted-average entry.
        let total = current_signed.abs() + signed_fill.abs();
        if !total.is_zero() {
            position.entry_price = (position.entry_price * current_signed.abs()
                + price * signed_fill.abs())
                / total;
        }
    } else {
        // Reducing, closing or flipping: the overlapping portion realizes.
        let closed = current_signed.abs().min(signed_fill.abs());
        let direction = if current_signed > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        realized = Some((price - position.entry_price) * closed * direction);
        if new_signed.signum() != current_signed.signum() && !new_signed.is_zero() {
            // Flip: the remainder opens at the fill price.
            position.entry_price = price;
        }
    }

    position.side = if new_signed.is_zero() {
        PositionSide::Flat
    } else if new_signed > Decimal::ZERO {
        PositionSide::Long
    } else {
        PositionSide::Short
    };
    position.size = new_signed.abs();
    if position.is_flat() {
        position.entry_price = Decimal::ZERO;
    }
    position.leverage = leverage;
    position.margin = if leverage.is_zero() {
        Decimal::ZERO
    } else {
        position.size * price / leverage
    };
    position.unrealized_pnl = Decimal::ZERO;
    position.updated_at = ts;

    (position, realized)
}

/// Owns the per-order keyed mutex so lifecycle events stay strictly
/// serialized per order, whether the executor or the reconciliation loop is
/// writing.
pub struct OrderManager {
    repo: Arc<dyn OrderRepository>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderManager {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> Arc<dyn OrderRepository> {
        self.repo.clone()
    }

    async fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn transition(&self, event: &LifecycleEvent) -> Result<()> {
        let lock = self.lock_for(&event.order_id).await;
        let _guard = lock.lock().await;
        self.repo.append_event(event).await
    }

    /// Reconciles the local order against a venue-reported state, appending
    /// whatever fill and status events are missing. `source` lands in the
    /// event payload ("executor" or "reconciliation").
    pub async fn apply_venue_state(
        &self,
        order: &Order,
        state: &VenueOrderState,
        source: &str,
    ) -> Result<()> {
        let lock = self.lock_for(&order.id).await;
        let _guard = lock.lock().await;

        let Some(local) = self.repo.get(&order.id).await? else {
            bail!("Order {} vanished from the store", order.id);
        };
        if local.status.is_terminal() {
            return Ok(());
        }

        if local.exchange_order_id.is_none() && !state.exchange_order_id.is_empty() {
            self.repo
                .set_exchange_order_id(&local.id, &state.exchange_order_id)
                .await?;
        }

        let now = Utc::now().timestamp_millis();
        let mut payload = state.raw.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "source".to_string(),
                serde_json::Value::String(source.to_string()),
            );
        }

        // A NEW order the venue clearly acknowledged (crash between submit
        // and ack): replay the derived ACCEPTED event first so the state
        // machine's path stays intact.
        if local.status == OrderStatus::New && state.status != OrderStatus::Rejected {
            let event = LifecycleEvent {
                order_id: local.id.clone(),
                status: OrderStatus::Accepted,
                ts: now,
                exchange_status: Some(state.exchange_status.clone()),
                fill_qty: None,
                fill_price: None,
                fee: None,
                raw_payload: Some(payload.clone()),
            };
            self.repo.append_event(&event).await?;
        }

        // Missing fills first.
        let prev_filled = self.repo.filled_amount(&local.id).await?;
        let fill_delta = state.filled_qty - prev_filled;
        if fill_delta > Decimal::ZERO {
            let fill_price = state
                .avg_fill_price
                .or(local.price)
                .unwrap_or(Decimal::ZERO);
            let prev_fees: Decimal = self
                .repo
                .trades_for(&local.id)
                .await?
                .iter()
                .map(|t| t.fee)
                .sum();
            let fee_delta = (state.fee - prev_fees).max(Decimal::ZERO);

            let status = if state.filled_qty >= local.amount {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let event = LifecycleEvent {
                order_id: local.id.clone(),
                status,
                ts: now,
                exchange_status: Some(state.exchange_status.clone()),
                fill_qty: Some(fill_delta),
                fill_price: Some(fill_price),
                fee: Some(fee_delta),
                raw_payload: Some(payload.clone()),
            };

            let position = self.repo.get_position(&local.symbol).await?;
            let (position, realized) = apply_fill(
                position,
                &local.symbol,
                local.side,
                fill_delta,
                fill_price,
                local.leverage,
                now,
            );
            let trade = Trade {
                id: Uuid::new_v4().to_string(),
                order_id: local.id.clone(),
                symbol: local.symbol.clone(),
                side: local.side,
                price: fill_price,
                amount: fill_delta,
                fee: fee_delta,
                fee_currency: "USDT".to_string(),
                realized_pnl: realized,
                ts: now,
            };
            self.repo.record_fill(&event, &trade, &position).await?;
        }

        // Then any remaining status divergence (e.g. venue-side cancel).
        let Some(local) = self.repo.get(&order.id).await? else {
            return Ok(());
        };
        if state.status != local.status
            && !local.status.is_terminal()
            && local.status.can_transition_to(state.status)
        {
            let event = LifecycleEvent {
                order_id: local.id.clone(),
                status: state.status,
                ts: now,
                exchange_status: Some(state.exchange_status.clone()),
                fill_qty: None,
                fill_price: None,
                fee: None,
                raw_payload: Some(payload),
            };
            self.repo.append_event(&event).await?;
        }
        Ok(())
    }
}

/// Shared submit interface for the simulated and live paths.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit(&self, intent: &OrderIntent) -> Result<Order>;
}

fn order_from_intent(intent: &OrderIntent, id: &str, client_order_id: &str, ts: i64) -> Order {
    Order {
        id: id.to_string(),
        client_order_id: client_order_id.to_string(),
        exchange_order_id: None,
        symbol: intent.symbol.clone(),
        side: intent.side,
        order_type: intent.order_type,
        price: intent.price,
        amount: intent.amount,
        leverage: intent.leverage,
        status: OrderStatus::New,
        time_in_force: intent.time_in_force,
        created_at: ts,
        updated_at: ts,
    }
}

/// Fills immediately at the latest observed price through the slippage model
/// and fee schedule. Deterministic given the same data and seed.
pub struct SimulatedExecutor {
    manager: Arc<OrderManager>,
    data: Arc<DataService>,
    slippage: Arc<dyn SlippageModel>,
    fees: FeeSchedule,
}

impl SimulatedExecutor {
    pub fn new(
        manager: Arc<OrderManager>,
        data: Arc<DataService>,
        slippage: Arc<dyn SlippageModel>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            manager,
            data,
            slippage,
            fees,
        }
    }

    async fn reference_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(prices) = self.data.get_latest_prices(symbol).await? {
            if prices.last > Decimal::ZERO {
                return Ok(prices.last);
            }
        }
        bail!("No reference price available for {}", symbol);
    }
}

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn submit(&self, intent: &OrderIntent) -> Result<Order> {
        let repo = self.manager.repo();
        let now = Utc::now().timestamp_millis();
        let id = Uuid::new_v4().to_string();
        let client_order_id = Uuid::new_v4().simple().to_string();
        let order = order_from_intent(intent, &id, &client_order_id, now);

        repo.insert_order(&order, &LifecycleEvent::status_only(&id, OrderStatus::New, now))
            .await?;
        self.manager
            .transition(&LifecycleEvent::status_only(&id, OrderStatus::Accepted, now))
            .await?;

        let reference = self.reference_price(&intent.symbol).await?;
        let fill_price = self
            .slippage
            .execution_price(reference, intent.amount, intent.side);
        let fee = self.fees.fee(intent.amount, fill_price, true);

        let position = repo.get_position(&intent.symbol).await?;
        let (position, realized) = apply_fill(
            position,
            &intent.symbol,
            intent.side,
            intent.amount,
            fill_price,
            intent.leverage,
            now,
        );

        let event = LifecycleEvent {
            order_id: id.clone(),
            status: OrderStatus::Filled,
            ts: now,
            exchange_status: Some("simulated".to_string()),
            fill_qty: Some(intent.amount),
            fill_price: Some(fill_price),
            fee: Some(fee),
            raw_payload: Some(serde_json::json!({"source": "simulated"})),
        };
        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            order_id: id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            price: fill_price,
            amount: intent.amount,
            fee,
            fee_currency: "USDT".to_string(),
            realized_pnl: realized,
            ts: now,
        };
        {
            let lock = self.manager.lock_for(&id).await;
            let _guard = lock.lock().await;
            repo.record_fill(&event, &trade, &position).await?;
        }

        info!(
            "Simulated fill: {} {} {} @ {}",
            intent.side, intent.amount, intent.symbol, fill_price
        );
        repo.get(&id)
            .await?
            .context("Simulated order vanished after fill")
    }
}

/// Routes to the real venue. The client order id is persisted before the
/// network call, so crash-retries can never place a duplicate order.
pub struct LiveExecutor {
    manager: Arc<OrderManager>,
    venue: Arc<dyn VenueAdapter>,
    poll_timeout: Duration,
    max_attempts: usize,
}

impl LiveExecutor {
    pub fn new(
        manager: Arc<OrderManager>,
        venue: Arc<dyn VenueAdapter>,
        poll_timeout: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            manager,
            venue,
            poll_timeout,
            max_attempts,
        }
    }

    async fn submit_with_retry(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
    ) -> Result<crate::domain::ports::VenueOrderAck, VenueError> {
        let mut attempt = 0usize;
        loop {
            match self.venue.submit_order(intent, client_order_id).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = Duration::from_millis(300 * (1 << attempt.min(5)) as u64);
                    warn!(
                        "Order submit attempt {} failed: {}; retrying in {:?}",
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
}

#[async_trait]
impl OrderExecutor for LiveExecutor {
    async fn submit(&self, intent: &OrderIntent) -> Result<Order> {
        let repo = self.manager.repo();
        let now = Utc::now().timestamp_millis();
        let id = Uuid::new_v4().to_string();
        let client_order_id = Uuid::new_v4().simple().to_string();
        let order = order_from_intent(intent, &id, &client_order_id, now);

        // Persisted before the wire so reconciliation can pick the order up
        // after a crash mid-submit.
        repo.insert_order(&order, &LifecycleEvent::status_only(&id, OrderStatus::New, now))
            .await?;

        match self.submit_with_retry(intent, &client_order_id).await {
            Ok(ack) => {
                repo.set_exchange_order_id(&id, &ack.exchange_order_id).await?;
                let mut event = LifecycleEvent::status_only(
                    &id,
                    OrderStatus::Accepted,
                    Utc::now().timestamp_millis(),
                );
                event.exchange_status = Some("live".to_string());
                self.manager.transition(&event).await?;
            }
            Err(e) => {
                let mut event = LifecycleEvent::status_only(
                    &id,
                    OrderStatus::Rejected,
                    Utc::now().timestamp_millis(),
                );
                event.raw_payload = Some(serde_json::json!({
                    "source": "executor",
                    "error": e.to_string(),
                }));
                self.manager.transition(&event).await?;
                return repo
                    .get(&id)
                    .await?
                    .context("Rejected order vanished from the store");
            }
        }

        // Poll for fills until terminal or the configured window closes.
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            match self.venue.fetch_order(&intent.symbol, &client_order_id).await {
                Ok(state) => {
                    let current = repo
                        .get(&id)
                        .await?
                        .context("Order vanished during fill poll")?;
                    self.manager
                        .apply_venue_state(&current, &state, "executor")
                        .await?;
                }
                Err(e) => warn!("Fill poll failed for {}: {}", client_order_id, e),
            }

            let current = repo.get(&id).await?.context("Order vanished during fill poll")?;
            if current.status.is_terminal() {
                return Ok(current);
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let current = repo.get(&id).await?.context("Order vanished after poll")?;
        if intent.time_in_force == TimeInForce::Ioc && !current.status.is_terminal() {
            // IOC-style: cancel the remainder.
            if let Err(e) = self.venue.cancel_order(&intent.symbol, &client_order_id).await {
                warn!("Cancel after poll timeout failed: {}", e);
            }
            if let Ok(state) = self.venue.fetch_order(&intent.symbol, &client_order_id).await {
                self.manager
                    .apply_venue_state(&current, &state, "executor")
                    .await?;
            }
        }
        // GTC orders stay open; the order sync loop owns them from here.
        repo.get(&id).await?.context("Order vanished after poll")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::MarketRepository;
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        SqliteCandleRepository, SqliteMarketRepository, SqliteOrderRepository,
    };
    use crate::infrastructure::sim::{SimVenue, ZeroSlippage};
    use crate::domain::types::PriceSnapshot;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_open_from_flat() {
        let plan = plan_child_orders(
            "BTC-USDT-SWAP",
            0.5,
            None,
            dec!(10000),
            dec!(50000),
            dec!(2),
            TimeInForce::Gtc,
            false,
        )
        .unwrap();
        assert_eq!(plan.intents.len(), 1);
        let intent = &plan.intents[0];
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.amount, dec!(0.1));
        assert!(!intent.reduce_only);
        assert!(plan.is_increasing);
        assert_eq!(plan.gross_notional, dec!(5000));
    }

    #[test]
    fn test_plan_close_is_reduce_only() {
        let mut position = Position::flat("BTC-USDT-SWAP", 0);
        position.side = PositionSide::Long;
        position.size = dec!(0.1);
        position.entry_price = dec!(50000);

        let plan = plan_child_orders(
            "BTC-USDT-SWAP",
            0.0,
            Some(&position),
            dec!(10000),
            dec!(50000),
            dec!(2),
            TimeInForce::Gtc,
            false,
        )
        .unwrap();
        let intent = &plan.intents[0];
        assert_eq!(intent.side, Side::Sell);
        assert_eq!(intent.amount, dec!(0.1));
        assert!(intent.reduce_only);
        assert!(!plan.is_increasing);
    }

    #[test]
    fn test_plan_no_op_when_delta_dust() {
        let mut position = Position::flat("BTC-USDT-SWAP", 0);
        position.side = PositionSide::Long;
        position.size = dec!(0.1);

        let plan = plan_child_orders(
            "BTC-USDT-SWAP",
            0.5,
            Some(&position),
            dec!(10000),
            dec!(50000),
            dec!(2),
            TimeInForce::Gtc,
            false,
        )
        .unwrap();
        assert!(plan.intents.is_empty());
    }

    #[test]
    fn test_apply_fill_open_extend_close() {
        // Open long 0.1 @ 50000.
        let (pos, realized) = apply_fill(
            None,
            "BTC-USDT-SWAP",
            Side::Buy,
            dec!(0.1),
            dec!(50000),
            dec!(2),
            1,
        );
        assert_eq!(pos.side, PositionSide::Long);
        assert_eq!(pos.size, dec!(0.1));
        assert_eq!(pos.entry_price, dec!(50000));
        assert!(realized.is_none());

        // Extend 0.1 @ 52000: entry averages to 51000.
        let (pos, realized) = apply_fill(
            Some(pos),
            "BTC-USDT-SWAP",
            Side::Buy,
            dec!(0.1),
            dec!(52000),
            dec!(2),
            2,
        );
        assert_eq!(pos.size, dec!(0.2));
        assert_eq!(pos.entry_price, dec!(51000));
        assert!(realized.is_none());

        // Close everything @ 53000: realized = 2000 * 0.2.
        let (pos, realized) = apply_fill(
            Some(pos),
            "BTC-USDT-SWAP",
            Side::Sell,
            dec!(0.2),
            dec!(53000),
            dec!(2),
            3,
        );
        assert!(pos.is_flat());
        assert_eq!(realized.unwrap(), dec!(400));
    }

    #[test]
    fn test_apply_fill_short_close_realizes_inverse() {
        let (pos, _) = apply_fill(
            None,
            "BTC-USDT-SWAP",
            Side::Sell,
            dec!(1),
            dec!(50000),
            dec!(1),
            1,
        );
        assert_eq!(pos.side, PositionSide::Short);

        let (pos, realized) = apply_fill(
            Some(pos),
            "BTC-USDT-SWAP",
            Side::Buy,
            dec!(1),
            dec!(49000),
            dec!(1),
            2,
        );
        assert!(pos.is_flat());
        assert_eq!(realized.unwrap(), dec!(1000));
    }

    async fn sim_executor() -> (SimulatedExecutor, Arc<SqliteOrderRepository>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let market = Arc::new(SqliteMarketRepository::new(db.pool.clone()));
        market
            .insert_price_snapshot(&PriceSnapshot {
                symbol: "BTC-USDT-SWAP".to_string(),
                ts: 1,
                last: dec!(50000),
                mark: dec!(50000),
                index: dec!(50000),
            })
            .await
            .unwrap();
        let data = Arc::new(DataService::new(
            Arc::new(SqliteCandleRepository::new(db.pool.clone())),
            market,
        ));
        let manager = Arc::new(OrderManager::new(orders.clone()));
        (
            SimulatedExecutor::new(manager, data, Arc::new(ZeroSlippage), FeeSchedule::flat(dec!(0.0005))),
            orders,
        )
    }

    #[tokio::test]
    async fn test_simulated_submit_full_lifecycle() {
        let (executor, orders) = sim_executor().await;
        let intent = OrderIntent {
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            amount: dec!(0.1),
            leverage: dec!(2),
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
        };

        let order = executor.submit(&intent).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let events = orders.events_for(&order.id).await.unwrap();
        let statuses: Vec<OrderStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![OrderStatus::New, OrderStatus::Accepted, OrderStatus::Filled]
        );

        let position = orders.get_position("BTC-USDT-SWAP").await.unwrap().unwrap();
        assert_eq!(position.size, dec!(0.1));
        assert_eq!(position.side, PositionSide::Long);
        assert_eq!(orders.filled_amount(&order.id).await.unwrap(), dec!(0.1));
    }

    #[tokio::test]
    async fn test_live_submit_retries_and_never_duplicates() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let manager = Arc::new(OrderManager::new(orders.clone()));
        let venue = Arc::new(SimVenue::new());
        venue.fail_next_submits(2);

        let executor = LiveExecutor::new(
            manager,
            venue.clone(),
            Duration::from_millis(50),
            4,
        );
        let intent = OrderIntent {
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            amount: dec!(1),
            leverage: dec!(2),
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
        };

        let order = executor.submit(&intent).await.unwrap();
        // Two transient failures, then one accepted placement.
        assert_eq!(venue.submissions(), 1);
        assert!(order.exchange_order_id.is_some());
        assert_eq!(order.status, OrderStatus::Accepted);
    }
}
