//! Live-path order lifecycle: submit, partial fill, cancel of the remainder.
//! Lifecycle events are the source of truth and must match the state machine
//! exactly.

use perpcore::application::executor::{LiveExecutor, OrderExecutor, OrderManager};
use perpcore::application::reconcile::OrderSyncLoop;
use perpcore::domain::repositories::OrderRepository;
use perpcore::domain::types::{
    OrderIntent, OrderStatus, OrderType, PositionSide, Side, TimeInForce,
};
use perpcore::infrastructure::persistence::database::Database;
use perpcore::infrastructure::persistence::repositories::SqliteOrderRepository;
use perpcore::infrastructure::sim::SimVenue;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const SYMBOL: &str = "BTC-USDT-SWAP";

fn buy_one() -> OrderIntent {
    OrderIntent {
        symbol: SYMBOL.to_string(),
        side: Side::Buy,
        order_type: OrderType::Market,
        price: None,
        amount: dec!(1.0),
        leverage: dec!(2),
        time_in_force: TimeInForce::Gtc,
        reduce_only: false,
    }
}

#[tokio::test]
async fn test_partial_fill_then_cancel_produces_exact_history() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
    let manager = Arc::new(OrderManager::new(orders.clone()));
    let venue = Arc::new(SimVenue::new());

    // Short poll window: the executor hands the open order to the sync loop.
    let executor = LiveExecutor::new(
        manager.clone(),
        venue.clone(),
        Duration::from_millis(10),
        3,
    );
    let order = executor.submit(&buy_one()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Accepted);

    // Venue fills 0.3, then the remainder is canceled venue-side.
    venue.fill_order(&order.client_order_id, dec!(0.3), dec!(50000), dec!(7.5));
    let sync = OrderSyncLoop::new(
        venue.clone(),
        manager.clone(),
        SYMBOL.to_string(),
        Duration::from_secs(15),
        Duration::from_secs(60),
    );
    sync.tick().await.unwrap();

    venue.cancel_order_on_venue(&order.client_order_id);
    sync.tick().await.unwrap();

    let stored = orders.get(&order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);

    // Exactly 4 events: NEW, ACCEPTED, PARTIALLY_FILLED, CANCELED.
    let events = orders.events_for(&order.id).await.unwrap();
    let statuses: Vec<OrderStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::New,
            OrderStatus::Accepted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Canceled,
        ]
    );

    // Events are strictly ordered in time.
    for pair in events.windows(2) {
        assert!(pair[0].ts <= pair[1].ts);
    }

    // Trades sum to the filled amount, never past the order amount.
    let trades = orders.trades_for(&order.id).await.unwrap();
    let filled: Decimal = trades.iter().map(|t| t.amount).sum();
    assert_eq!(filled, dec!(0.3));
    assert!(filled <= stored.amount);

    // Position reflects the partial fill; later decisions see 0.3.
    let position = orders.get_position(SYMBOL).await.unwrap().unwrap();
    assert_eq!(position.side, PositionSide::Long);
    assert_eq!(position.size, dec!(0.3));
}

#[tokio::test]
async fn test_full_fill_closes_the_machine() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
    let manager = Arc::new(OrderManager::new(orders.clone()));
    let venue = Arc::new(SimVenue::new());

    let executor = LiveExecutor::new(
        manager.clone(),
        venue.clone(),
        Duration::from_millis(10),
        3,
    );
    let order = executor.submit(&buy_one()).await.unwrap();

    venue.fill_order(&order.client_order_id, dec!(0.4), dec!(50000), dec!(10));
    venue.fill_order(&order.client_order_id, dec!(0.6), dec!(50100), dec!(15));

    let sync = OrderSyncLoop::new(
        venue,
        manager,
        SYMBOL.to_string(),
        Duration::from_secs(15),
        Duration::from_secs(60),
    );
    sync.tick().await.unwrap();

    let stored = orders.get(&order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);
    assert_eq!(orders.filled_amount(&order.id).await.unwrap(), dec!(1.0));

    // Terminal: another tick appends nothing.
    let events_before = orders.events_for(&order.id).await.unwrap().len();
    let sync2 = OrderSyncLoop::new(
        Arc::new(SimVenue::new()),
        Arc::new(OrderManager::new(orders.clone())),
        SYMBOL.to_string(),
        Duration::from_secs(15),
        Duration::from_secs(60),
    );
    sync2.tick().await.unwrap();
    assert_eq!(
        orders.events_for(&order.id).await.unwrap().len(),
        events_before
    );
}
