//! Daemon restart with pending orders: the order sync loop converges local
//! state to venue truth without placing anything twice.

use perpcore::application::executor::OrderManager;
use perpcore::application::reconcile::OrderSyncLoop;
use perpcore::domain::ports::VenueAdapter;
use perpcore::domain::repositories::OrderRepository;
use perpcore::domain::types::{
    LifecycleEvent, Order, OrderIntent, OrderStatus, OrderType, Side, TimeInForce,
};
use perpcore::infrastructure::persistence::database::Database;
use perpcore::infrastructure::persistence::repositories::SqliteOrderRepository;
use perpcore::infrastructure::sim::SimVenue;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const SYMBOL: &str = "BTC-USDT-SWAP";

fn intent(amount: rust_decimal::Decimal) -> OrderIntent {
    OrderIntent {
        symbol: SYMBOL.to_string(),
        side: Side::Buy,
        order_type: OrderType::Market,
        price: None,
        amount,
        leverage: dec!(2),
        time_in_force: TimeInForce::Gtc,
        reduce_only: false,
    }
}

async fn seed_order(
    repo: &SqliteOrderRepository,
    id: &str,
    client_order_id: &str,
    status: OrderStatus,
    amount: rust_decimal::Decimal,
    ts: i64,
) {
    let order = Order {
        id: id.to_string(),
        client_order_id: client_order_id.to_string(),
        exchange_order_id: None,
        symbol: SYMBOL.to_string(),
        side: Side::Buy,
        order_type: OrderType::Market,
        price: None,
        amount,
        leverage: dec!(2),
        status: OrderStatus::New,
        time_in_force: TimeInForce::Gtc,
        created_at: ts,
        updated_at: ts,
    };
    repo.insert_order(&order, &LifecycleEvent::status_only(id, OrderStatus::New, ts))
        .await
        .unwrap();
    if status != OrderStatus::New {
        repo.append_event(&LifecycleEvent::status_only(id, status, ts + 1))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_three_pending_orders_converge_after_restart() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let repo = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
    let venue = Arc::new(SimVenue::new());
    let now = Utc::now().timestamp_millis();

    // The pre-crash daemon had three orders at the venue.
    venue.submit_order(&intent(dec!(1)), "cl-accepted").await.unwrap();
    venue.submit_order(&intent(dec!(1)), "cl-partial").await.unwrap();
    venue.fill_order("cl-partial", dec!(0.5), dec!(50000), dec!(12.5));
    venue.submit_order(&intent(dec!(1)), "cl-new").await.unwrap();
    venue.fill_order("cl-new", dec!(1), dec!(50100), dec!(25));
    let submissions_before = venue.submissions();

    // Local store as the crash left it: one ACCEPTED, one stale
    // PARTIALLY_FILLED-as-ACCEPTED, one NEW that never saw its ack.
    seed_order(&repo, "o-accepted", "cl-accepted", OrderStatus::Accepted, dec!(1), now).await;
    seed_order(&repo, "o-partial", "cl-partial", OrderStatus::Accepted, dec!(1), now).await;
    seed_order(&repo, "o-new", "cl-new", OrderStatus::New, dec!(1), now).await;

    // Restarted daemon: the order sync loop picks everything up.
    let manager = Arc::new(OrderManager::new(repo.clone()));
    let sync = OrderSyncLoop::new(
        venue.clone(),
        manager,
        SYMBOL.to_string(),
        Duration::from_secs(15),
        Duration::from_secs(60),
    );
    // Two ORDER_INTERVAL ticks is the convergence budget.
    sync.tick().await.unwrap();
    sync.tick().await.unwrap();

    let accepted = repo.get("o-accepted").await.unwrap().unwrap();
    assert_eq!(accepted.status, OrderStatus::Accepted);
    assert!(accepted.exchange_order_id.is_some());

    let partial = repo.get("o-partial").await.unwrap().unwrap();
    assert_eq!(partial.status, OrderStatus::PartiallyFilled);
    assert_eq!(repo.filled_amount("o-partial").await.unwrap(), dec!(0.5));

    let filled = repo.get("o-new").await.unwrap().unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(repo.filled_amount("o-new").await.unwrap(), dec!(1));

    // Reconciliation never resubmits: the venue saw exactly the original
    // three placements.
    assert_eq!(venue.submissions(), submissions_before);
}

#[tokio::test]
async fn test_second_tick_is_idempotent() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let repo = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
    let venue = Arc::new(SimVenue::new());
    let now = Utc::now().timestamp_millis();

    venue.submit_order(&intent(dec!(1)), "cl-a").await.unwrap();
    venue.fill_order("cl-a", dec!(0.5), dec!(50000), dec!(12.5));
    seed_order(&repo, "o-a", "cl-a", OrderStatus::Accepted, dec!(1), now).await;

    let manager = Arc::new(OrderManager::new(repo.clone()));
    let sync = OrderSyncLoop::new(
        venue,
        manager,
        SYMBOL.to_string(),
        Duration::from_secs(15),
        Duration::from_secs(60),
    );
    sync.tick().await.unwrap();
    let events_after_first = repo.events_for("o-a").await.unwrap().len();
    sync.tick().await.unwrap();

    // No venue change between ticks: nothing new is appended and the filled
    // amount does not double-count.
    assert_eq!(repo.events_for("o-a").await.unwrap().len(), events_after_first);
    assert_eq!(repo.filled_amount("o-a").await.unwrap(), dec!(0.5));
}
