use crate::application::executor::OrderManager;
use crate::domain::errors::VenueError;
use crate::domain::ports::VenueAdapter;
use crate::domain::repositories::{AccountSnapshotRepository, OrderRepository, RiskEventRepository};
use crate::domain::types::{
    Balance, BalanceSnapshotRow, LifecycleEvent, OrderStatus, Position, PositionSnapshotRow,
    RiskEvent, RiskLevel,
};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

fn equity_from_balances(balances: &[Balance]) -> Decimal {
    balances
        .iter()
        .find(|b| b.currency == "USDT")
        .map(|b| b.total)
        .unwrap_or_else(|| balances.iter().map(|b| b.total).sum())
}

/// Periodic account sync: balances and positions from the venue into
/// snapshots plus the current position row. Drift beyond tolerance is flagged
/// but never self-healed; the executor stays authoritative for intent.
pub struct AccountSyncLoop {
    venue: Arc<dyn VenueAdapter>,
    snapshots: Arc<dyn AccountSnapshotRepository>,
    orders: Arc<dyn OrderRepository>,
    risk_events: Arc<dyn RiskEventRepository>,
    exchange: String,
    account_id: String,
    symbol: String,
    interval: Duration,
    drift_tolerance: Decimal,
    running: Mutex<()>,
}

impl AccountSyncLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        snapshots: Arc<dyn AccountSnapshotRepository>,
        orders: Arc<dyn OrderRepository>,
        risk_events: Arc<dyn RiskEventRepository>,
        exchange: String,
        account_id: String,
        symbol: String,
        interval: Duration,
        drift_tolerance: Decimal,
    ) -> Self {
        Self {
            venue,
            snapshots,
            orders,
            risk_events,
            exchange,
            account_id,
            symbol,
            interval,
            drift_tolerance,
            running: Mutex::new(()),
        }
    }

    /// One sync pass. Re-entrant safe: a tick that starts while the previous
    /// one is still running is skipped, not stacked.
    pub async fn tick(&self) -> Result<()> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Account sync tick skipped: previous tick still running");
            return Ok(());
        };
        let now = Utc::now().timestamp_millis();

        let balances = self.venue.fetch_balances().await?;
        let equity = equity_from_balances(&balances);
        self.snapshots
            .insert_balance_snapshot(&BalanceSnapshotRow {
                exchange: self.exchange.clone(),
                account_id: self.account_id.clone(),
                ts: now,
                total_equity: equity,
                raw_payload: serde_json::json!(balances
                    .iter()
                    .map(|b| serde_json::json!({
                        "ccy": b.currency,
                        "total": b.total.to_string(),
                        "available": b.available.to_string(),
                    }))
                    .collect::<Vec<_>>()),
            })
            .await?;

        let venue_positions = self.venue.fetch_positions(Some(&self.symbol)).await?;
        for position in &venue_positions {
            self.snapshots
                .insert_position_snapshot(&PositionSnapshotRow {
                    exchange: self.exchange.clone(),
                    account_id: self.account_id.clone(),
                    ts: now,
                    symbol: position.symbol.clone(),
                    side: position.side,
                    size: position.size,
                    entry_price: position.entry_price,
                    raw_payload: serde_json::json!({
                        "upl": position.unrealized_pnl.to_string(),
                        "margin": position.margin.to_string(),
                        "leverage": position.leverage.to_string(),
                    }),
                })
                .await?;
        }

        let venue_position = venue_positions
            .into_iter()
            .next()
            .unwrap_or_else(|| Position::flat(&self.symbol, now));
        let local_position = self
            .orders
            .get_position(&self.symbol)
            .await?
            .unwrap_or_else(|| Position::flat(&self.symbol, now));

        let drift = (venue_position.signed_size() - local_position.signed_size()).abs();
        if drift > self.drift_tolerance {
            warn!(
                "Position drift on {}: local {} vs venue {}",
                self.symbol,
                local_position.signed_size(),
                venue_position.signed_size()
            );
            self.risk_events
                .insert(&RiskEvent {
                    ts: now,
                    symbol: self.symbol.clone(),
                    level: RiskLevel::Warn,
                    rule: "POSITION_DRIFT".to_string(),
                    details: format!(
                        "local {} vs venue {}",
                        local_position.signed_size(),
                        venue_position.signed_size()
                    ),
                })
                .await?;
        }

        // The row tracks exchange truth for mark-to-market fields.
        self.orders.upsert_position(&venue_position).await?;
        Ok(())
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Account sync loop started ({}s)", self.interval.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Account sync tick failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Account sync loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Periodic order sync: replays venue state over local open orders through
/// the same per-order lock the executor uses. Synthetic catch-up events carry
/// `source = "reconciliation"` in their payload.
pub struct OrderSyncLoop {
    venue: Arc<dyn VenueAdapter>,
    manager: Arc<OrderManager>,
    symbol: String,
    interval: Duration,
    /// How long a NEW order may sit without an exchange id before it is
    /// declared dead. Covers crash-mid-submit.
    grace: Duration,
    running: Mutex<()>,
}

impl OrderSyncLoop {
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        manager: Arc<OrderManager>,
        symbol: String,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            venue,
            manager,
            symbol,
            interval,
            grace,
            running: Mutex::new(()),
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Order sync tick skipped: previous tick still running");
            return Ok(());
        };
        let repo = self.manager.repo();
        let now = Utc::now().timestamp_millis();

        for order in repo.open_orders(&self.symbol).await? {
            match self
                .venue
                .fetch_order(&self.symbol, &order.client_order_id)
                .await
            {
                Ok(state) => {
                    self.manager
                        .apply_venue_state(&order, &state, "reconciliation")
                        .await?;
                }
                Err(VenueError::OrderNotFound { .. }) => {
                    let age_ms = now - order.created_at;
                    if age_ms > self.grace.as_millis() as i64 {
                        // Submission never reached the venue; expire locally.
                        warn!(
                            "Order {} unknown to venue after {}ms, expiring",
                            order.client_order_id, age_ms
                        );
                        let mut event =
                            LifecycleEvent::status_only(&order.id, OrderStatus::Expired, now);
                        event.raw_payload = Some(serde_json::json!({
                            "source": "reconciliation",
                            "reason": "unknown at venue after grace period",
                        }));
                        self.manager.transition(&event).await?;
                    }
                }
                Err(e) => warn!(
                    "Order sync fetch failed for {}: {}",
                    order.client_order_id, e
                ),
            }
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Order sync loop started ({}s)", self.interval.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Order sync tick failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Order sync loop stopping");
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
    use crate::domain::types::{Order, OrderIntent, OrderType, PositionSide, Side, TimeInForce};
    use crate::infrastructure::persistence::database::Database;
    use crate::infrastructure::persistence::repositories::{
        SqliteOrderRepository, SqliteRiskEventRepository, SqliteSnapshotRepository,
    };
    use crate::infrastructure::sim::SimVenue;
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent {
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            amount: dec!(1),
            leverage: dec!(2),
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
        }
    }

    async fn seed_local_order(
        repo: &SqliteOrderRepository,
        id: &str,
        client_order_id: &str,
        status: OrderStatus,
        created_at: i64,
    ) {
        let order = Order {
            id: id.to_string(),
            client_order_id: client_order_id.to_string(),
            exchange_order_id: None,
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            amount: dec!(1),
            leverage: dec!(2),
            status: OrderStatus::New,
            time_in_force: TimeInForce::Gtc,
            created_at,
            updated_at: created_at,
        };
        repo.insert_order(
            &order,
            &LifecycleEvent::status_only(id, OrderStatus::New, created_at),
        )
        .await
        .unwrap();
        if status != OrderStatus::New {
            repo.append_event(&LifecycleEvent::status_only(id, status, created_at + 1))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_order_sync_converges_to_venue_truth() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let manager = Arc::new(OrderManager::new(repo.clone()));
        let venue = Arc::new(SimVenue::new());
        let now = Utc::now().timestamp_millis();

        // Venue knows the order as partially filled; local still thinks
        // ACCEPTED (e.g. daemon crashed mid-poll).
        venue.submit_order(&intent(), "cl-a").await.unwrap();
        venue.fill_order("cl-a", dec!(0.3), dec!(50000), dec!(7.5));
        seed_local_order(&repo, "o-a", "cl-a", OrderStatus::Accepted, now).await;

        // Venue-side manual cancel to discover.
        venue.submit_order(&intent(), "cl-b").await.unwrap();
        venue.cancel_order_on_venue("cl-b");
        seed_local_order(&repo, "o-b", "cl-b", OrderStatus::Accepted, now).await;

        let sync = OrderSyncLoop::new(
            venue,
            manager,
            "BTC-USDT-SWAP".to_string(),
            Duration::from_secs(15),
            Duration::from_secs(60),
        );
        sync.tick().await.unwrap();

        let a = repo.get("o-a").await.unwrap().unwrap();
        assert_eq!(a.status, OrderStatus::PartiallyFilled);
        assert_eq!(repo.filled_amount("o-a").await.unwrap(), dec!(0.3));

        // The catch-up event is annotated as reconciliation-sourced.
        let events = repo.events_for("o-a").await.unwrap();
        let fill = events
            .iter()
            .find(|e| e.status == OrderStatus::PartiallyFilled)
            .unwrap();
        assert_eq!(
            fill.raw_payload.as_ref().unwrap()["source"],
            serde_json::json!("reconciliation")
        );

        let b = repo.get("o-b").await.unwrap().unwrap();
        assert_eq!(b.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_unacknowledged_order_expires_after_grace() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let manager = Arc::new(OrderManager::new(repo.clone()));
        let venue = Arc::new(SimVenue::new());
        let now = Utc::now().timestamp_millis();

        // Local NEW order the venue never saw, created well past grace.
        seed_local_order(&repo, "o-lost", "cl-lost", OrderStatus::New, now - 120_000).await;

        let sync = OrderSyncLoop::new(
            venue,
            manager,
            "BTC-USDT-SWAP".to_string(),
            Duration::from_secs(15),
            Duration::from_secs(60),
        );
        sync.tick().await.unwrap();

        let lost = repo.get("o-lost").await.unwrap().unwrap();
        assert_eq!(lost.status, OrderStatus::Expired);

        // Within grace: left alone.
        seed_local_order(&repo, "o-fresh", "cl-fresh", OrderStatus::New, now).await;
        sync.tick().await.unwrap();
        let fresh = repo.get("o-fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_account_sync_snapshots_and_drift_warning() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotRepository::new(db.pool.clone()));
        let risk = Arc::new(SqliteRiskEventRepository::new(db.pool.clone()));
        let venue = Arc::new(SimVenue::new());

        venue.set_balances(vec![Balance {
            currency: "USDT".to_string(),
            total: dec!(10000),
            available: dec!(9000),
        }]);
        let mut venue_position = Position::flat("BTC-USDT-SWAP", 0);
        venue_position.side = PositionSide::Long;
        venue_position.size = dec!(0.5);
        venue_position.entry_price = dec!(50000);
        venue.set_positions(vec![venue_position]);

        // Local thinks flat: drift of 0.5.
        let sync = AccountSyncLoop::new(
            venue,
            snapshots.clone(),
            orders.clone(),
            risk.clone(),
            "okx".to_string(),
            "demo".to_string(),
            "BTC-USDT-SWAP".to_string(),
            Duration::from_secs(30),
            dec!(0.0001),
        );
        sync.tick().await.unwrap();

        assert_eq!(
            snapshots.latest_equity("okx", "demo").await.unwrap(),
            Some(dec!(10000))
        );
        let events = risk.recent("BTC-USDT-SWAP", 5).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule, "POSITION_DRIFT");

        // Position row now reflects venue truth.
        let position = orders.get_position("BTC-USDT-SWAP").await.unwrap().unwrap();
        assert_eq!(position.size, dec!(0.5));
    }
}
