use crate::domain::errors::OrderStateError;
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{
    LifecycleEvent, Order, OrderStatus, OrderType, Position, PositionSide, Side, TimeInForce,
    Trade,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order> {
        let price: Option<String> = row.try_get("price")?;
        Ok(Order {
            id: row.try_get("id")?,
            client_order_id: row.try_get("client_order_id")?,
            exchange_order_id: row.try_get("exchange_order_id")?,
            symbol: row.try_get("symbol")?,
            side: Side::from_str(row.try_get::<String, _>("side")?.as_str())?,
            order_type: OrderType::from_str(row.try_get::<String, _>("order_type")?.as_str())?,
            price: price.map(|p| Decimal::from_str(&p)).transpose()?,
            amount: Decimal::from_str(row.try_get::<String, _>("amount")?.as_str())?,
            leverage: Decimal::from_str(row.try_get::<String, _>("leverage")?.as_str())?,
            status: OrderStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
            time_in_force: TimeInForce::from_str(
                row.try_get::<String, _>("time_in_force")?.as_str(),
            )?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn map_event(row: &sqlx::sqlite::SqliteRow) -> Result<LifecycleEvent> {
        let fill_qty: Option<String> = row.try_get("fill_qty")?;
        let fill_price: Option<String> = row.try_get("fill_price")?;
        let fee: Option<String> = row.try_get("fee")?;
        let raw: Option<String> = row.try_get("raw_payload")?;
        Ok(LifecycleEvent {
            order_id: row.try_get("order_id")?,
            status: OrderStatus::from_str(row.try_get::<String, _>("status")?.as_str())?,
            ts: row.try_get("ts")?,
            exchange_status: row.try_get("exchange_status")?,
            fill_qty: fill_qty.map(|v| Decimal::from_str(&v)).transpose()?,
            fill_price: fill_price.map(|v| Decimal::from_str(&v)).transpose()?,
            fee: fee.map(|v| Decimal::from_str(&v)).transpose()?,
            raw_payload: raw.map(|v| serde_json::from_str(&v)).transpose()?,
        })
    }

    fn map_trade(row: &sqlx::sqlite::SqliteRow) -> Result<Trade> {
        let realized: Option<String> = row.try_get("realized_pnl")?;
        Ok(Trade {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            symbol: row.try_get("symbol")?,
            side: Side::from_str(row.try_get::<String, _>("side")?.as_str())?,
            price: Decimal::from_str(row.try_get::<String, _>("price")?.as_str())?,
            amount: Decimal::from_str(row.try_get::<String, _>("amount")?.as_str())?,
            fee: Decimal::from_str(row.try_get::<String, _>("fee")?.as_str())?,
            fee_currency: row.try_get("fee_currency")?,
            realized_pnl: realized.map(|v| Decimal::from_str(&v)).transpose()?,
            ts: row.try_get("ts")?,
        })
    }

    /// Validates the state machine and appends one lifecycle event inside the
    /// caller's transaction. Advances the order row status. The whole
    /// transaction rolls back on an illegal transition, so partial writes
    /// cannot happen.
    async fn append_event_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        event: &LifecycleEvent,
    ) -> Result<()> {
        let row = sqlx::query("SELECT status FROM orders WHERE id = ?")
            .bind(&event.order_id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Err(OrderStateError::NotFound {
                order_id: event.order_id.clone(),
            }
            .into());
        };
        let current = OrderStatus::from_str(row.try_get::<String, _>("status")?.as_str())?;

        if !current.can_transition_to(event.status) {
            return Err(OrderStateError::InvalidTransition {
                order_id: event.order_id.clone(),
                from: current,
                to: event.status,
            }
            .into());
        }

        let last_ts: Option<i64> =
            sqlx::query_scalar("SELECT MAX(ts) FROM order_lifecycle_events WHERE order_id = ?")
                .bind(&event.order_id)
                .fetch_one(&mut **tx)
                .await?;
        if let Some(last_ts) = last_ts {
            if event.ts < last_ts {
                return Err(OrderStateError::NonMonotonicTimestamp {
                    order_id: event.order_id.clone(),
                    ts: event.ts,
                    last_ts,
                }
                .into());
            }
        }

        Self::insert_event_in_tx(tx, event).await?;

        sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(event.status.to_string())
            .bind(event.ts)
            .bind(&event.order_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn insert_event_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        event: &LifecycleEvent,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lifecycle_events
                (order_id, status, ts, exchange_status, fill_qty, fill_price, fee, raw_payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.order_id)
        .bind(event.status.to_string())
        .bind(event.ts)
        .bind(&event.exchange_status)
        .bind(event.fill_qty.map(|v| v.to_string()))
        .bind(event.fill_price.map(|v| v.to_string()))
        .bind(event.fee.map(|v| v.to_string()))
        .bind(
            event
                .raw_payload
                .as_ref()
                .map(|v| v.to_string()),
        )
        .execute(&mut **tx)
        .await
        .context("Failed to append lifecycle event")?;
        Ok(())
    }

    async fn upsert_position_in_tx(
        tx: &mut Transaction<'static, Sqlite>,
        position: &Position,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, side, size, entry_price, leverage, unrealized_pnl, margin, liquidation_price, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                side = excluded.side,
                size = excluded.size,
                entry_price = excluded.entry_price,
                leverage = excluded.leverage,
                unrealized_pnl = excluded.unrealized_pnl,
                margin = excluded.margin,
                liquidation_price = excluded.liquidation_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.symbol)
        .bind(position.side.to_string())
        .bind(position.size.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.leverage.to_string())
        .bind(position.unrealized_pnl.to_string())
        .bind(position.margin.to_string())
        .bind(position.liquidation_price.map(|v| v.to_string()))
        .bind(position.updated_at)
        .execute(&mut **tx)
        .await
        .context("Failed to upsert position")?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert_order(&self, order: &Order, event: &LifecycleEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, client_order_id, exchange_order_id, symbol, side, order_type, price, amount,
                 leverage, status, time_in_force, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.client_order_id)
        .bind(&order.exchange_order_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.price.map(|v| v.to_string()))
        .bind(order.amount.to_string())
        .bind(order.leverage.to_string())
        .bind(order.status.to_string())
        .bind(order.time_in_force.to_string())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert order")?;

        Self::insert_event_in_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_event(&self, event: &LifecycleEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::append_event_in_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_fill(
        &self,
        event: &LifecycleEvent,
        trade: &Trade,
        position: &Position,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        Self::append_event_in_tx(&mut tx, event).await?;

        sqlx::query(
            r#"
            INSERT INTO trades (id, order_id, symbol, side, price, amount, fee, fee_currency, realized_pnl, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.order_id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.price.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.fee.to_string())
        .bind(&trade.fee_currency)
        .bind(trade.realized_pnl.map(|v| v.to_string()))
        .bind(trade.ts)
        .execute(&mut *tx)
        .await
        .context("Failed to insert trade")?;

        Self::upsert_position_in_tx(&mut tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_exchange_order_id(&self, order_id: &str, exchange_order_id: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET exchange_order_id = ? WHERE id = ?")
            .bind(exchange_order_id)
            .bind(order_id)
            .execute(&self.pool)
            .await
            .context("Failed to set exchange order id")?;
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_order).transpose()
    }

    async fn find_by_client_order_id(&self, client_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = ?")
            .bind(client_order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_order).transpose()
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE symbol = ? AND status IN ('NEW', 'ACCEPTED', 'PARTIALLY_FILLED')
            ORDER BY created_at ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_order).collect()
    }

    async fn events_for(&self, order_id: &str) -> Result<Vec<LifecycleEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM order_lifecycle_events WHERE order_id = ? ORDER BY ts ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_event).collect()
    }

    async fn trades_for(&self, order_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE order_id = ? ORDER BY ts ASC")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_trade).collect()
    }

    async fn filled_amount(&self, order_id: &str) -> Result<Decimal> {
        let trades = self.trades_for(order_id).await?;
        Ok(trades.iter().map(|t| t.amount).sum())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let liq: Option<String> = row.try_get("liquidation_price")?;
                Ok(Some(Position {
                    symbol: row.try_get("symbol")?,
                    side: PositionSide::from_str(row.try_get::<String, _>("side")?.as_str())?,
                    size: Decimal::from_str(row.try_get::<String, _>("size")?.as_str())?,
                    entry_price: Decimal::from_str(
                        row.try_get::<String, _>("entry_price")?.as_str(),
                    )?,
                    leverage: Decimal::from_str(row.try_get::<String, _>("leverage")?.as_str())?,
                    unrealized_pnl: Decimal::from_str(
                        row.try_get::<String, _>("unrealized_pnl")?.as_str(),
                    )?,
                    margin: Decimal::from_str(row.try_get::<String, _>("margin")?.as_str())?,
                    liquidation_price: liq.map(|v| Decimal::from_str(&v)).transpose()?,
                    updated_at: row.try_get("updated_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_position(&self, position: &Position) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_position_in_tx(&mut tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_closing_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE symbol = ? AND realized_pnl IS NOT NULL
            ORDER BY ts DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_trade).collect()
    }

    async fn realized_pnl_since(&self, symbol: &str, since_ts: i64) -> Result<Decimal> {
        let trades = sqlx::query(
            r#"
            SELECT realized_pnl FROM trades
            WHERE symbol = ? AND ts >= ? AND realized_pnl IS NOT NULL
            "#,
        )
        .bind(symbol)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for row in trades {
            let pnl: String = row.try_get("realized_pnl")?;
            total += Decimal::from_str(&pnl)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    async fn repo() -> SqliteOrderRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteOrderRepository::new(db.pool)
    }

    fn new_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            client_order_id: format!("cl-{}", id),
            exchange_order_id: None,
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            amount: dec!(1),
            leverage: dec!(2),
            status: OrderStatus::New,
            time_in_force: TimeInForce::Gtc,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[tokio::test]
    async fn test_insert_and_transition() {
        let repo = repo().await;
        let order = new_order("o1");
        repo.insert_order(&order, &LifecycleEvent::status_only("o1", OrderStatus::New, 1000))
            .await
            .unwrap();

        repo.append_event(&LifecycleEvent::status_only("o1", OrderStatus::Accepted, 1001))
            .await
            .unwrap();

        let stored = repo.get("o1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Accepted);
        assert_eq!(repo.events_for("o1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected_and_nothing_written() {
        let repo = repo().await;
        let order = new_order("o1");
        repo.insert_order(&order, &LifecycleEvent::status_only("o1", OrderStatus::New, 1000))
            .await
            .unwrap();

        // NEW -> FILLED skips ACCEPTED.
        let err = repo
            .append_event(&LifecycleEvent::status_only("o1", OrderStatus::Filled, 1001))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<OrderStateError>().is_some());

        let stored = repo.get("o1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::New);
        assert_eq!(repo.events_for("o1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_status_never_succeeded() {
        let repo = repo().await;
        let order = new_order("o1");
        repo.insert_order(&order, &LifecycleEvent::status_only("o1", OrderStatus::New, 1000))
            .await
            .unwrap();
        repo.append_event(&LifecycleEvent::status_only("o1", OrderStatus::Accepted, 1001))
            .await
            .unwrap();
        repo.append_event(&LifecycleEvent::status_only("o1", OrderStatus::Canceled, 1002))
            .await
            .unwrap();

        let err = repo
            .append_event(&LifecycleEvent::status_only("o1", OrderStatus::Accepted, 1003))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<OrderStateError>().is_some());
    }

    #[tokio::test]
    async fn test_non_monotonic_event_ts_rejected() {
        let repo = repo().await;
        let order = new_order("o1");
        repo.insert_order(&order, &LifecycleEvent::status_only("o1", OrderStatus::New, 1000))
            .await
            .unwrap();

        let err = repo
            .append_event(&LifecycleEvent::status_only("o1", OrderStatus::Accepted, 999))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrderStateError>(),
            Some(OrderStateError::NonMonotonicTimestamp { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_fill_writes_trade_and_position_atomically() {
        let repo = repo().await;
        let order = new_order("o1");
        repo.insert_order(&order, &LifecycleEvent::status_only("o1", OrderStatus::New, 1000))
            .await
            .unwrap();
        repo.append_event(&LifecycleEvent::status_only("o1", OrderStatus::Accepted, 1001))
            .await
            .unwrap();

        let mut event = LifecycleEvent::status_only("o1", OrderStatus::PartiallyFilled, 1002);
        event.fill_qty = Some(dec!(0.3));
        event.fill_price = Some(dec!(50000));

        let trade = Trade {
            id: "t1".to_string(),
            order_id: "o1".to_string(),
            symbol: "BTC-USDT-SWAP".to_string(),
            side: Side::Buy,
            price: dec!(50000),
            amount: dec!(0.3),
            fee: dec!(7.5),
            fee_currency: "USDT".to_string(),
            realized_pnl: None,
            ts: 1002,
        };
        let mut position = Position::flat("BTC-USDT-SWAP", 1002);
        position.side = PositionSide::Long;
        position.size = dec!(0.3);
        position.entry_price = dec!(50000);

        repo.record_fill(&event, &trade, &position).await.unwrap();

        assert_eq!(repo.filled_amount("o1").await.unwrap(), dec!(0.3));
        let pos = repo.get_position("BTC-USDT-SWAP").await.unwrap().unwrap();
        assert_eq!(pos.size, dec!(0.3));
        assert_eq!(
            repo.get("o1").await.unwrap().unwrap().status,
            OrderStatus::PartiallyFilled
        );
    }
}
