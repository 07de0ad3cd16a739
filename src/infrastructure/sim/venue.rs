use crate::domain::errors::VenueError;
use crate::domain::ports::{VenueAdapter, VenueOrderAck, VenueOrderState};
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{
    Balance, Candle, FundingRate, OrderIntent, OrderStatus, Position, PriceSnapshot,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct SimOrder {
    client_order_id: String,
    exchange_order_id: String,
    symbol: String,
    amount: Decimal,
    filled: Decimal,
    avg_price: Decimal,
    fee: Decimal,
    status: OrderStatus,
}

impl SimOrder {
    fn to_state(&self) -> VenueOrderState {
        let exchange_status = match self.status {
            OrderStatus::Accepted => "live",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            _ => "live",
        };
        VenueOrderState {
            client_order_id: self.client_order_id.clone(),
            exchange_order_id: self.exchange_order_id.clone(),
            status: self.status,
            exchange_status: exchange_status.to_string(),
            filled_qty: self.filled,
            avg_fill_price: (!self.avg_price.is_zero()).then_some(self.avg_price),
            fee: self.fee,
            raw: serde_json::json!({
                "ordId": self.exchange_order_id,
                "clOrdId": self.client_order_id,
                "state": exchange_status,
                "accFillSz": self.filled.to_string(),
            }),
        }
    }
}

/// Deterministic in-memory venue for tests and simulated live loops. Fills are
/// driven explicitly by the test (or by the simulated executor) rather than by
/// wall-clock behavior.
#[derive(Default)]
pub struct SimVenue {
    candles: Mutex<HashMap<(String, Timeframe), Vec<Candle>>>,
    funding: Mutex<HashMap<String, Vec<FundingRate>>>,
    prices: Mutex<HashMap<String, PriceSnapshot>>,
    balances: Mutex<Vec<Balance>>,
    positions: Mutex<Vec<Position>>,
    orders: Mutex<HashMap<String, SimOrder>>,
    submit_count: AtomicUsize,
    fail_submits: AtomicUsize,
    next_order_id: AtomicUsize,
}

impl SimVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_candles(&self, candles: Vec<Candle>) {
        let mut map = self.candles.lock().unwrap();
        for candle in candles {
            map.entry((candle.symbol.clone(), candle.timeframe))
                .or_default()
                .push(candle);
        }
        for series in map.values_mut() {
            series.sort_by_key(|c| c.ts);
            series.dedup_by_key(|c| c.ts);
        }
    }

    pub fn set_funding(&self, funding: FundingRate) {
        self.funding
            .lock()
            .unwrap()
            .entry(funding.symbol.clone())
            .or_default()
            .push(funding);
    }

    pub fn set_prices(&self, snapshot: PriceSnapshot) {
        self.prices
            .lock()
            .unwrap()
            .insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn set_balances(&self, balances: Vec<Balance>) {
        *self.balances.lock().unwrap() = balances;
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().unwrap() = positions;
    }

    /// Makes the next `n` submissions fail with a transient error, for retry
    /// and idempotence tests.
    pub fn fail_next_submits(&self, n: usize) {
        self.fail_submits.store(n, Ordering::SeqCst);
    }

    /// Total accepted submissions. An idempotent resubmit does not increase
    /// this.
    pub fn submissions(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    /// Venue-side fill, e.g. "0.3 filled at 50000".
    pub fn fill_order(&self, client_order_id: &str, qty: Decimal, price: Decimal, fee: Decimal) {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(client_order_id) {
            let prev_notional = order.avg_price * order.filled;
            order.filled += qty;
            order.fee += fee;
            order.avg_price = if order.filled.is_zero() {
                Decimal::ZERO
            } else {
                (prev_notional + price * qty) / order.filled
            };
            order.status = if order.filled >= order.amount {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
        }
    }

    /// Venue-side manual cancel (e.g. from the exchange UI), which the order
    /// reconciliation loop must discover.
    pub fn cancel_order_on_venue(&self, client_order_id: &str) {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(client_order_id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Canceled;
            }
        }
    }
}

#[async_trait]
impl VenueAdapter for SimVenue {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError> {
        let map = self.candles.lock().unwrap();
        let series = map
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        Ok(series
            .into_iter()
            .filter(|c| c.ts >= since)
            .take(limit)
            .collect())
    }

    async fn fetch_funding(&self, symbol: &str) -> Result<FundingRate, VenueError> {
        self.funding
            .lock()
            .unwrap()
            .get(symbol)
            .and_then(|rows| rows.last().cloned())
            .ok_or_else(|| VenueError::Permanent(format!("No funding for {}", symbol)))
    }

    async fn fetch_mark_index_last(&self, symbol: &str) -> Result<PriceSnapshot, VenueError> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::Permanent(format!("No prices for {}", symbol)))
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>, VenueError> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn fetch_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, VenueError> {
        let positions = self.positions.lock().unwrap().clone();
        Ok(match symbol {
            Some(symbol) => positions.into_iter().filter(|p| p.symbol == symbol).collect(),
            None => positions,
        })
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        client_order_id: &str,
    ) -> Result<VenueOrderAck, VenueError> {
        if self
            .fail_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VenueError::Transient("Simulated outage".to_string()));
        }

        let mut orders = self.orders.lock().unwrap();
        // Same client order id never places a second order.
        if let Some(existing) = orders.get(client_order_id) {
            return Ok(VenueOrderAck {
                exchange_order_id: existing.exchange_order_id.clone(),
                status: existing.status,
            });
        }

        let exchange_order_id = format!(
            "sim-{}",
            self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1
        );
        orders.insert(
            client_order_id.to_string(),
            SimOrder {
                client_order_id: client_order_id.to_string(),
                exchange_order_id: exchange_order_id.clone(),
                symbol: intent.symbol.clone(),
                amount: intent.amount,
                filled: Decimal::ZERO,
                avg_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                status: OrderStatus::Accepted,
            },
        );
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        Ok(VenueOrderAck {
            exchange_order_id,
            status: OrderStatus::Accepted,
        })
    }

    async fn fetch_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<VenueOrderState, VenueError> {
        self.orders
            .lock()
            .unwrap()
            .get(client_order_id)
            .map(|o| o.to_state())
            .ok_or_else(|| VenueError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            })
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrderState>, VenueError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .map(|o| o.to_state())
            .collect())
    }

    async fn cancel_order(&self, _symbol: &str, client_order_id: &str) -> Result<(), VenueError> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(client_order_id) {
            Some(order) => {
                if !order.status.is_terminal() {
                    order.status = OrderStatus::Canceled;
                }
                Ok(())
            }
            None => Err(VenueError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{OrderType, Side, TimeInForce};
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

    #[tokio::test]
    async fn test_resubmit_same_client_order_id_is_idempotent() {
        let venue = SimVenue::new();
        let ack1 = venue.submit_order(&intent(), "cl-1").await.unwrap();
        let ack2 = venue.submit_order(&intent(), "cl-1").await.unwrap();
        assert_eq!(ack1.exchange_order_id, ack2.exchange_order_id);
        assert_eq!(venue.submissions(), 1);
    }

    #[tokio::test]
    async fn test_partial_fill_then_cancel() {
        let venue = SimVenue::new();
        venue.submit_order(&intent(), "cl-1").await.unwrap();
        venue.fill_order("cl-1", dec!(0.3), dec!(50000), dec!(7.5));

        let state = venue.fetch_order("BTC-USDT-SWAP", "cl-1").await.unwrap();
        assert_eq!(state.status, OrderStatus::PartiallyFilled);
        assert_eq!(state.filled_qty, dec!(0.3));

        venue.cancel_order("BTC-USDT-SWAP", "cl-1").await.unwrap();
        let state = venue.fetch_order("BTC-USDT-SWAP", "cl-1").await.unwrap();
        assert_eq!(state.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_simulated_outage() {
        let venue = SimVenue::new();
        venue.fail_next_submits(2);
        assert!(venue.submit_order(&intent(), "cl-1").await.is_err());
        assert!(venue.submit_order(&intent(), "cl-1").await.is_err());
        assert!(venue.submit_order(&intent(), "cl-1").await.is_ok());
    }
}
