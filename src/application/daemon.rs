use crate::application::data_service::DataService;
use crate::application::decision::{LlmAllocator, ProposalOutcome};
use crate::application::executor::{
    plan_child_orders, LiveExecutor, OrderExecutor, OrderManager, SimulatedExecutor,
};
use crate::application::ingest::{IngestConfig, IngestWorker};
use crate::application::integrity::{IntegrityScanner, RepairWorker};
use crate::application::reconcile::{AccountSyncLoop, OrderSyncLoop};
use crate::application::risk_gate::{loss_streak, RiskContext, RiskGate, RiskLimits};
use crate::application::scheduler::{
    PerformanceTracker, PortfolioScheduler, ScheduleInput, ScheduleOutcome, SchedulerConfig,
};
use crate::application::strategies::StrategyRegistry;
use crate::config::{Config, DecisionMode, ExecutorKind};
use crate::domain::regime::{RegimeClassifier, RegimeThresholds};
use crate::domain::repositories::{
    AccountSnapshotRepository, DecisionRepository, OrderRepository,
};
use crate::domain::types::{Allocation, Decision, TimeInForce};
use crate::infrastructure::llm::OpenAiCompatibleClient;
use crate::infrastructure::okx::{OkxClient, OkxCredentials};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqliteDecisionRepository, SqliteIntegrityRepository,
    SqliteMarketRepository, SqliteOrderRepository, SqliteRiskEventRepository,
    SqliteSnapshotRepository,
};
use crate::infrastructure::sim::{FeeSchedule, FixedBpsSlippage};
use anyhow::{Context as _, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// The live trading process: ingest, integrity, repair, decision cycle,
/// account sync and order sync as independent cooperative loops over one
/// shared store. No loop blocks another; an error in one is isolated to it.
pub struct Daemon {
    config: Config,
    executor_kind: ExecutorKind,
    decision_mode: DecisionMode,
}

impl Daemon {
    pub fn new(config: Config, executor_kind: ExecutorKind, decision_mode: DecisionMode) -> Self {
        Self {
            config,
            executor_kind,
            decision_mode,
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let db = Database::connect(&config.database_url).await?;
        db.migrate().await?;

        let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
        let market = Arc::new(SqliteMarketRepository::new(db.pool.clone()));
        let integrity = Arc::new(SqliteIntegrityRepository::new(db.pool.clone()));
        let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let decisions = Arc::new(SqliteDecisionRepository::new(db.pool.clone()));
        let risk_events = Arc::new(SqliteRiskEventRepository::new(db.pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotRepository::new(db.pool.clone()));

        let credentials = (!config.okx_api_key.is_empty()).then(|| OkxCredentials {
            api_key: config.okx_api_key.clone(),
            api_secret: config.okx_api_secret.clone(),
            passphrase: config.okx_passphrase.clone(),
        });
        let venue = Arc::new(OkxClient::new(
            credentials,
            config.okx_is_demo,
            config.okx_td_mode.clone(),
        ));

        let data = Arc::new(DataService::new(candles.clone(), market.clone()));
        let manager = Arc::new(OrderManager::new(orders.clone()));

        let executor: Arc<dyn OrderExecutor> = match self.executor_kind {
            ExecutorKind::Simulated => Arc::new(SimulatedExecutor::new(
                manager.clone(),
                data.clone(),
                Arc::new(FixedBpsSlippage::new(config.sim_slippage_bps)),
                FeeSchedule::flat(config.sim_fee_rate),
            )),
            ExecutorKind::Live => Arc::new(LiveExecutor::new(
                manager.clone(),
                venue.clone(),
                Duration::from_secs(config.order_poll_timeout_secs),
                config.submit_max_attempts,
            )),
        };

        let registry = Arc::new(StrategyRegistry::with_defaults());
        let scheduler = PortfolioScheduler::new(SchedulerConfig {
            top_k: config.portfolio_top_k,
            regime_weight: config.portfolio_regime_weight,
            global_leverage: config.portfolio_global_leverage,
            min_notional: config.portfolio_min_notional,
            diff_threshold_bps: config.portfolio_diff_threshold_bps,
            perf_lookback: config.portfolio_perf_lookback,
        });
        let perf_tracker = PerformanceTracker::new(
            orders.clone(),
            decisions.clone(),
            config.portfolio_perf_lookback,
        );
        let classifier = RegimeClassifier::new(RegimeThresholds {
            adx_trend: config.regime_adx_threshold,
            bb_width_threshold: config.regime_bb_width_threshold,
            vol_kill_threshold: config.regime_vol_kill_threshold,
            ..RegimeThresholds::default()
        });
        let gate = RiskGate::new(
            RiskLimits {
                trading_enabled: config.trading_enabled,
                min_confidence: config.risk_min_confidence,
                max_notional: config.risk_max_notional,
                max_leverage: config.risk_max_leverage,
                max_daily_loss_pct: config.risk_max_daily_loss_pct,
                cooldown_losses: config.risk_cooldown_losses,
                cooldown_bars: config.risk_cooldown_bars,
            },
            risk_events.clone(),
        );

        let allocator = match (self.decision_mode, config.has_llm()) {
            (DecisionMode::Llm, true) => {
                let provider = config.llm_provider.clone().unwrap_or_default();
                let client = OpenAiCompatibleClient::new(
                    config.llm_base_url.clone(),
                    config.llm_api_key.clone(),
                    config.llm_model.clone(),
                    config.llm_timeout_secs,
                )?;
                Some(LlmAllocator::new(Arc::new(client), decisions.clone(), provider))
            }
            (DecisionMode::Llm, false) => {
                warn!("LLM decision mode requested but no provider configured; using portfolio scheduler");
                None
            }
            _ => None,
        };

        let ingest = Arc::new(IngestWorker::new(
            venue.clone(),
            candles.clone(),
            market.clone(),
            risk_events.clone(),
            IngestConfig {
                symbol: config.symbol.clone(),
                timeframes: vec![config.timeframe],
                initial_backfill_days: config.initial_backfill_days,
                batch_size: config.ingest_batch_size,
                interval_secs: config.ingest_interval_secs,
                max_retries: 5,
            },
        ));
        let scanner = Arc::new(IntegrityScanner::new(candles.clone(), integrity.clone()));
        let repair = Arc::new(RepairWorker::new(
            venue.clone(),
            candles.clone(),
            integrity.clone(),
            config.ingest_batch_size,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(ingest.clone().run(shutdown_rx.clone())));
        handles.push(tokio::spawn(repair.clone().run(shutdown_rx.clone())));
        handles.push(tokio::spawn(Self::integrity_loop(
            scanner,
            config.symbol.clone(),
            config.timeframe,
            shutdown_rx.clone(),
        )));

        // Reconciliation talks to the venue account; it only runs when orders
        // actually route there.
        if self.executor_kind == ExecutorKind::Live {
            let account_sync = Arc::new(AccountSyncLoop::new(
                venue.clone(),
                snapshots.clone(),
                orders.clone(),
                risk_events.clone(),
                "okx".to_string(),
                config.okx_account_id.clone(),
                config.symbol.clone(),
                Duration::from_secs(config.account_interval_secs),
                config.position_drift_tolerance,
            ));
            let order_sync = Arc::new(OrderSyncLoop::new(
                venue.clone(),
                manager.clone(),
                config.symbol.clone(),
                Duration::from_secs(config.order_interval_secs),
                Duration::from_secs(config.reconcile_grace_secs),
            ));
            handles.push(tokio::spawn(account_sync.run(shutdown_rx.clone())));
            handles.push(tokio::spawn(order_sync.run(shutdown_rx.clone())));
        }

        let cycle = Arc::new(DecisionCycle {
            config: self.config.clone(),
            executor_kind: self.executor_kind,
            data,
            registry,
            classifier,
            scheduler,
            perf_tracker,
            allocator,
            gate,
            executor,
            orders,
            decisions,
            snapshots,
            running: Mutex::new(()),
        });
        handles.push(tokio::spawn(DecisionCycle::run(cycle, shutdown_rx)));

        info!(
            "Daemon started for {} {} (executor {:?}, decision mode {:?})",
            config.symbol, config.timeframe, self.executor_kind, self.decision_mode
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received, stopping loops");
        let _ = shutdown_tx.send(true);

        for handle in handles {
            let _ = handle.await;
        }
        info!("Daemon stopped");
        Ok(())
    }

    /// Periodic full-history scan; gaps become repair jobs that the repair
    /// worker drains.
    async fn integrity_loop(
        scanner: Arc<IntegrityScanner>,
        symbol: String,
        timeframe: crate::domain::timeframe::Timeframe,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Integrity scan loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match scanner.scan(&symbol, timeframe, None).await {
                        Ok(events) if !events.is_empty() => {
                            warn!("Integrity scan found {} events", events.len());
                        }
                        Ok(_) => debug!("Integrity scan clean"),
                        Err(e) => error!("Integrity scan failed: {:#}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Integrity scan loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// One decision pipeline instance: snapshot, regime, signals, allocation,
/// risk gate, execution. Never overlaps with itself.
struct DecisionCycle {
    config: Config,
    executor_kind: ExecutorKind,
    data: Arc<DataService>,
    registry: Arc<StrategyRegistry>,
    classifier: RegimeClassifier,
    scheduler: PortfolioScheduler,
    perf_tracker: PerformanceTracker,
    allocator: Option<LlmAllocator>,
    gate: RiskGate,
    executor: Arc<dyn OrderExecutor>,
    orders: Arc<SqliteOrderRepository>,
    decisions: Arc<SqliteDecisionRepository>,
    snapshots: Arc<SqliteSnapshotRepository>,
    running: Mutex<()>,
}

impl DecisionCycle {
    async fn run(cycle: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let bar_ms = cycle.config.timeframe.duration_ms();
        info!("Decision cycle started ({} cadence)", cycle.config.timeframe);
        loop {
            // Wake a few seconds after each bar boundary so ingest has had a
            // chance to persist the freshly closed bar.
            let now = Utc::now().timestamp_millis();
            let next_wake = cycle.config.timeframe.bar_start(now) + bar_ms + 5_000;
            let sleep = Duration::from_millis((next_wake - now).max(1_000) as u64);

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {
                    if let Err(e) = cycle.tick().await {
                        error!("Decision cycle failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Decision cycle stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Decision cycle tick skipped: previous cycle still running");
            return Ok(());
        };
        let config = &self.config;

        let snapshot = self
            .data
            .get_snapshot(&config.symbol, config.timeframe, config.snapshot_bars)
            .await?;
        if snapshot.is_empty() || snapshot.is_stale(config.data_stale_max_bars) {
            debug!("Snapshot stale or empty; holding");
            return Ok(());
        }

        let reading = self.classifier.classify(&snapshot);
        let signals = self.registry.signals(&snapshot);
        let feedback = self.perf_tracker.feedback(&config.symbol).await?;

        let equity = self
            .snapshots
            .latest_equity("okx", &config.okx_account_id)
            .await?
            .unwrap_or(config.sim_initial_equity);
        if equity <= Decimal::ZERO {
            warn!("Non-positive equity {}; holding", equity);
            return Ok(());
        }

        let position = self.orders.get_position(&config.symbol).await?;
        let price = match self.data.get_latest_prices(&config.symbol).await? {
            Some(prices) if prices.last > Decimal::ZERO => prices.last,
            _ => match snapshot.last_close() {
                Some(close) => close,
                None => return Ok(()),
            },
        };
        let current_weight = position
            .as_ref()
            .map(|p| {
                use rust_decimal::prelude::ToPrimitive;
                (p.signed_size() * price / equity).to_f64().unwrap_or(0.0)
            })
            .unwrap_or(0.0);

        // Allocation: LLM proposal when enabled and valid, deterministic
        // scheduler otherwise.
        let ts = snapshot
            .last_candle()
            .map(|c| c.ts + config.timeframe.duration_ms())
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let enabled = self.registry.ids();

        let mut decision: Option<Decision> = None;
        if let Some(allocator) = &self.allocator {
            match allocator
                .propose(&snapshot, &reading, &enabled, &feedback)
                .await?
            {
                ProposalOutcome::Proposal(proposal) => {
                    decision = Some(Decision {
                        ts,
                        symbol: config.symbol.clone(),
                        timeframe: config.timeframe,
                        regime: reading.regime,
                        allocations: proposal
                            .strategy_allocations
                            .iter()
                            .map(|a| Allocation {
                                strategy_id: a.strategy_id.clone(),
                                weight: a.weight,
                                confidence: a.confidence,
                            })
                            .collect(),
                        target_position: proposal.total_position,
                        confidence: proposal.confidence,
                        reasoning: proposal.reasoning.clone(),
                        prompt_version: Some(crate::application::decision::PROMPT_VERSION.to_string()),
                        model_version: Some(allocator.model_version()),
                    });
                }
                ProposalOutcome::Rejected(_) => {}
            }
        }

        let decision = match decision {
            Some(decision) => decision,
            None => {
                let outcome = self.scheduler.schedule(
                    &self.registry,
                    &ScheduleInput {
                        symbol: &config.symbol,
                        timeframe: config.timeframe,
                        ts,
                        signals: &signals,
                        regime: &reading,
                        perf: &feedback,
                        current_weight,
                        equity,
                    },
                );
                match outcome {
                    ScheduleOutcome::Emit(decision) => decision,
                    ScheduleOutcome::Hold { reason } => {
                        debug!("HOLD: {}", reason);
                        return Ok(());
                    }
                }
            }
        };

        self.decisions.insert_decision(&decision).await?;
        info!(
            "Decision: target {:.3} in regime {} ({})",
            decision.target_position, decision.regime, decision.reasoning
        );

        let plan = plan_child_orders(
            &config.symbol,
            decision.target_position,
            position.as_ref(),
            equity,
            price,
            Decimal::ONE,
            TimeInForce::Gtc,
            self.executor_kind == ExecutorKind::Live,
        )?;
        if plan.intents.is_empty() {
            debug!("No order delta after planning");
            return Ok(());
        }

        let recent = self
            .orders
            .recent_closing_trades(&config.symbol, config.portfolio_perf_lookback)
            .await?;
        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp_millis())
            .unwrap_or(0);
        let bars_since_last_loss = recent
            .iter()
            .find(|t| t.realized_pnl.map(|p| p < Decimal::ZERO).unwrap_or(false))
            .map(|t| {
                let now = Utc::now().timestamp_millis();
                ((now - t.ts) / config.timeframe.duration_ms()).max(0) as usize
            })
            .unwrap_or(usize::MAX);
        let risk_ctx = RiskContext {
            equity,
            daily_realized_pnl: self
                .orders
                .realized_pnl_since(&config.symbol, day_start)
                .await?,
            consecutive_losses: loss_streak(&recent),
            bars_since_last_loss,
            current_position: position,
        };

        if !self.gate.evaluate(&decision, &plan, &risk_ctx).await? {
            return Ok(());
        }

        for intent in &plan.intents {
            match self.executor.submit(intent).await {
                Ok(order) => info!(
                    "Order {} {} {} -> {}",
                    order.side, order.amount, order.symbol, order.status
                ),
                Err(e) => error!("Order submission failed: {:#}", e),
            }
        }
        Ok(())
    }
}
