//! The decision half of the core, end to end: snapshot -> regime -> signals
//! -> scheduler -> risk gate -> simulated executor -> store.

use perpcore::application::data_service::DataService;
use perpcore::application::decision::PerformanceFeedback;
use perpcore::application::executor::{
    plan_child_orders, OrderExecutor, OrderManager, SimulatedExecutor,
};
use perpcore::application::risk_gate::{RiskContext, RiskGate, RiskLimits};
use perpcore::application::scheduler::{
    PortfolioScheduler, ScheduleInput, ScheduleOutcome, SchedulerConfig,
};
use perpcore::application::strategies::StrategyRegistry;
use perpcore::domain::regime::{Regime, RegimeClassifier, RegimeThresholds};
use perpcore::domain::repositories::{
    CandleRepository, DecisionRepository, MarketRepository, OrderRepository, RiskEventRepository,
};
use perpcore::domain::timeframe::Timeframe;
use perpcore::domain::types::{Candle, OrderStatus, PriceSnapshot, TimeInForce};
use perpcore::infrastructure::persistence::database::Database;
use perpcore::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqliteDecisionRepository, SqliteMarketRepository,
    SqliteOrderRepository, SqliteRiskEventRepository,
};
use perpcore::infrastructure::sim::{FeeSchedule, ZeroSlippage};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

const SYMBOL: &str = "BTC-USDT-SWAP";
const START: i64 = 1_704_067_200_000;

fn trending_candles(bars: usize) -> Vec<Candle> {
    let tf = Timeframe::OneHour;
    (0..bars)
        .map(|i| {
            let p = 100.0 + i as f64 * 0.5;
            Candle {
                symbol: SYMBOL.to_string(),
                timeframe: tf,
                ts: START + i as i64 * tf.duration_ms(),
                open: Decimal::from_f64_retain(p).unwrap(),
                high: Decimal::from_f64_retain(p + 0.6).unwrap(),
                low: Decimal::from_f64_retain(p - 0.2).unwrap(),
                close: Decimal::from_f64_retain(p + 0.4).unwrap(),
                volume: dec!(100),
            }
        })
        .collect()
}

struct Harness {
    data: Arc<DataService>,
    orders: Arc<SqliteOrderRepository>,
    decisions: Arc<SqliteDecisionRepository>,
    risk_events: Arc<SqliteRiskEventRepository>,
    registry: StrategyRegistry,
    executor: SimulatedExecutor,
}

async fn harness() -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let market = Arc::new(SqliteMarketRepository::new(db.pool.clone()));
    let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
    let decisions = Arc::new(SqliteDecisionRepository::new(db.pool.clone()));
    let risk_events = Arc::new(SqliteRiskEventRepository::new(db.pool.clone()));

    let tape = trending_candles(200);
    candles.upsert_candles(&tape).await.unwrap();
    let last_close = tape.last().unwrap().close;
    market
        .insert_price_snapshot(&PriceSnapshot {
            symbol: SYMBOL.to_string(),
            ts: tape.last().unwrap().ts,
            last: last_close,
            mark: last_close,
            index: last_close,
        })
        .await
        .unwrap();

    let data = Arc::new(DataService::new(candles, market));
    let manager = Arc::new(OrderManager::new(orders.clone()));
    let executor = SimulatedExecutor::new(
        manager,
        data.clone(),
        Arc::new(ZeroSlippage),
        FeeSchedule::flat(dec!(0.0005)),
    );

    Harness {
        data,
        orders,
        decisions,
        risk_events,
        registry: StrategyRegistry::with_defaults(),
        executor,
    }
}

#[tokio::test]
async fn test_trend_snapshot_flows_to_filled_order() {
    let h = harness().await;
    let equity = dec!(10000);

    let snapshot = h.data.get_snapshot(SYMBOL, Timeframe::OneHour, 200).await.unwrap();
    assert_eq!(snapshot.len(), 200);

    let classifier = RegimeClassifier::new(RegimeThresholds::default());
    let reading = classifier.classify(&snapshot);
    assert_eq!(reading.regime, Regime::Trend);

    let signals = h.registry.signals(&snapshot);
    let scheduler = PortfolioScheduler::new(SchedulerConfig::default());
    let outcome = scheduler.schedule(
        &h.registry,
        &ScheduleInput {
            symbol: SYMBOL,
            timeframe: Timeframe::OneHour,
            ts: snapshot.as_of,
            signals: &signals,
            regime: &reading,
            perf: &PerformanceFeedback::default(),
            current_weight: 0.0,
            equity,
        },
    );
    let ScheduleOutcome::Emit(decision) = outcome else {
        panic!("trend tape should produce a decision");
    };
    assert!(decision.target_position > 0.0);
    h.decisions.insert_decision(&decision).await.unwrap();

    // A range strategy must not receive an allocation in TREND.
    assert!(decision
        .allocations
        .iter()
        .all(|a| a.strategy_id != "bollinger_range" && a.strategy_id != "grid"));

    let price = h.data.get_latest_prices(SYMBOL).await.unwrap().unwrap().last;
    let plan = plan_child_orders(
        SYMBOL,
        decision.target_position,
        None,
        equity,
        price,
        Decimal::ONE,
        TimeInForce::Gtc,
        false,
    )
    .unwrap();
    assert_eq!(plan.intents.len(), 1);

    let gate = RiskGate::new(RiskLimits::default(), h.risk_events.clone());
    let ctx = RiskContext {
        equity,
        daily_realized_pnl: Decimal::ZERO,
        consecutive_losses: 0,
        bars_since_last_loss: usize::MAX,
        current_position: None,
    };
    assert!(gate.evaluate(&decision, &plan, &ctx).await.unwrap());

    let order = h.executor.submit(&plan.intents[0]).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);

    // Position now matches the decision target within rounding.
    let position = h.orders.get_position(SYMBOL).await.unwrap().unwrap();
    let realized_weight =
        (position.signed_size() * price / equity).to_f64().unwrap();
    assert!((realized_weight - decision.target_position).abs() < 0.01);

    // The persisted decision round-trips.
    let stored = h.decisions.recent_decisions(SYMBOL, 1).await.unwrap();
    assert_eq!(stored[0].target_position, decision.target_position);
}

#[tokio::test]
async fn test_kill_switch_blocks_live_routing_and_records_event() {
    let h = harness().await;
    let equity = dec!(10000);

    let snapshot = h.data.get_snapshot(SYMBOL, Timeframe::OneHour, 200).await.unwrap();
    let classifier = RegimeClassifier::new(RegimeThresholds::default());
    let reading = classifier.classify(&snapshot);
    let signals = h.registry.signals(&snapshot);
    let scheduler = PortfolioScheduler::new(SchedulerConfig::default());
    let ScheduleOutcome::Emit(decision) = scheduler.schedule(
        &h.registry,
        &ScheduleInput {
            symbol: SYMBOL,
            timeframe: Timeframe::OneHour,
            ts: snapshot.as_of,
            signals: &signals,
            regime: &reading,
            perf: &PerformanceFeedback::default(),
            current_weight: 0.0,
            equity,
        },
    ) else {
        panic!("expected decision");
    };

    // Kill switch off: the decision is persisted (the would-have-been
    // record) but routing is blocked and a RiskEvent lands.
    h.decisions.insert_decision(&decision).await.unwrap();

    let price = h.data.get_latest_prices(SYMBOL).await.unwrap().unwrap().last;
    let plan = plan_child_orders(
        SYMBOL,
        decision.target_position,
        None,
        equity,
        price,
        Decimal::ONE,
        TimeInForce::Gtc,
        true, // live routing
    )
    .unwrap();

    let mut limits = RiskLimits::default();
    limits.trading_enabled = false;
    let gate = RiskGate::new(limits, h.risk_events.clone());
    let ctx = RiskContext {
        equity,
        daily_realized_pnl: Decimal::ZERO,
        consecutive_losses: 0,
        bars_since_last_loss: usize::MAX,
        current_position: None,
    };
    assert!(!gate.evaluate(&decision, &plan, &ctx).await.unwrap());

    let events = h.risk_events.recent(SYMBOL, 5).await.unwrap();
    assert_eq!(events[0].rule, "TRADING_DISABLED");

    // No order leaked out.
    assert!(h.orders.open_orders(SYMBOL).await.unwrap().is_empty());
    assert!(h.orders.get_position(SYMBOL).await.unwrap().is_none());

    // The decision itself is still on record.
    assert_eq!(h.decisions.recent_decisions(SYMBOL, 1).await.unwrap().len(), 1);
}
