mod metrics;

pub use metrics::compute_metrics;

use crate::application::data_service::DataService;
use crate::application::decision::PerformanceFeedback;
use crate::application::executor::plan_child_orders;
use crate::application::risk_gate::{evaluate_rules, RiskContext, RiskLimits};
use crate::application::scheduler::{
    PortfolioScheduler, ScheduleInput, ScheduleOutcome, SchedulerConfig,
};
use crate::application::strategies::StrategyRegistry;
use crate::domain::backtest::{
    BacktestDecisionRow, BacktestMetrics, BacktestPositionRow, BacktestRun, BacktestTradeRow,
    EquityPoint, BACKTEST_SCHEMA_VERSION,
};
use crate::domain::indicators;
use crate::domain::regime::{RegimeClassifier, RegimeThresholds};
use crate::domain::repositories::BacktestRepository;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, Position, PositionSide, Side, TimeInForce};
use crate::infrastructure::sim::{FeeSchedule, FixedBpsSlippage, SlippageModel};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ts: i64,
    pub end_ts: i64,
    pub initial_capital: Decimal,
    pub strategy_id: String,
    pub fee_rate: Decimal,
    pub slippage_bps: f64,
    pub funding_enabled: bool,
    /// Exit a stale position after this many bars without a favorable
    /// excursion of at least one entry-ATR. Zero disables the time stop.
    pub time_stop_bars: usize,
    pub seed: u64,
    pub scheduler: SchedulerConfig,
    pub risk: RiskLimits,
}

#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    pub run_id: String,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<BacktestTradeRow>,
}

/// In-memory position while a run replays.
struct OpenTrade {
    signed_qty: Decimal,
    entry_price: Decimal,
    entry_ts: i64,
    entry_fee: Decimal,
    stop: Option<Decimal>,
    take_profit: Option<Decimal>,
    bars_held: usize,
    entry_atr: f64,
    peak_favorable: f64,
}

impl OpenTrade {
    fn side(&self) -> Side {
        if self.signed_qty >= Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    fn unrealized(&self, mark: Decimal) -> Decimal {
        (mark - self.entry_price) * self.signed_qty
    }
}

/// Book-keeping shared by every exit path.
struct ReplayBook {
    cash: Decimal,
    open: Option<OpenTrade>,
    trades: Vec<BacktestTradeRow>,
    positions: Vec<BacktestPositionRow>,
    strategy_id: String,
}

impl ReplayBook {
    /// Closes up to `amount` of the open position at `raw_price` (slippage
    /// and fees applied). `amount >= size` closes everything.
    fn reduce(
        &mut self,
        amount: Decimal,
        raw_price: Decimal,
        ts: i64,
        reason: &str,
        slippage: &dyn SlippageModel,
        fees: &FeeSchedule,
    ) {
        let Some(trade) = self.open.as_mut() else {
            return;
        };
        let size = trade.signed_qty.abs();
        let closed = amount.min(size);
        if closed.is_zero() {
            return;
        }

        let exit_side = if trade.signed_qty > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        };
        let exit_price = slippage.execution_price(raw_price, closed, exit_side);
        let exit_fee = fees.fee(closed, exit_price, true);
        let direction = if trade.signed_qty > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        let gross = (exit_price - trade.entry_price) * closed * direction;
        let entry_fee_share = if size.is_zero() {
            Decimal::ZERO
        } else {
            trade.entry_fee * closed / size
        };
        let pnl = gross - entry_fee_share - exit_fee;

        self.cash += gross - exit_fee;

        let entry_notional = trade.entry_price * closed;
        let return_ratio = if entry_notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / entry_notional
        };
        self.trades.push(BacktestTradeRow {
            strategy_id: self.strategy_id.clone(),
            side: trade.side(),
            entry_ts: trade.entry_ts,
            exit_ts: ts,
            entry_price: trade.entry_price,
            exit_price,
            amount: closed,
            fees: entry_fee_share + exit_fee,
            pnl,
            return_pct: return_ratio,
            exit_reason: reason.to_string(),
        });

        let remaining = size - closed;
        if remaining.is_zero() {
            self.open = None;
            self.positions.push(BacktestPositionRow {
                ts,
                side: PositionSide::Flat,
                size: Decimal::ZERO,
                entry_price: Decimal::ZERO,
            });
        } else {
            trade.signed_qty = remaining * direction;
            trade.entry_fee -= entry_fee_share;
            self.positions.push(BacktestPositionRow {
                ts,
                side: if direction > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                size: remaining,
                entry_price: trade.entry_price,
            });
        }
    }

    fn close_all(
        &mut self,
        raw_price: Decimal,
        ts: i64,
        reason: &str,
        slippage: &dyn SlippageModel,
        fees: &FeeSchedule,
    ) {
        if let Some(trade) = self.open.as_ref() {
            let size = trade.signed_qty.abs();
            self.reduce(size, raw_price, ts, reason, slippage, fees);
        }
    }

    fn equity(&self, mark: Decimal) -> Decimal {
        self.cash
            + self
                .open
                .as_ref()
                .map(|t| t.unrealized(mark))
                .unwrap_or(Decimal::ZERO)
    }

    fn consecutive_losses(&self) -> usize {
        self.trades
            .iter()
            .rev()
            .take_while(|t| t.pnl < Decimal::ZERO)
            .count()
    }
}

/// Deterministic historical replay through the same strategy, regime,
/// scheduler and risk-rule path the live pipeline uses. Signals form at bar
/// close, fills happen at the next bar open through the configured slippage
/// and fee models. Repeating the same inputs and seed reproduces the outputs.
pub struct BacktestEngine {
    data: Arc<DataService>,
    backtests: Arc<dyn BacktestRepository>,
    registry: Arc<StrategyRegistry>,
}

impl BacktestEngine {
    pub fn new(
        data: Arc<DataService>,
        backtests: Arc<dyn BacktestRepository>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            data,
            backtests,
            registry,
        }
    }

    pub async fn run(&self, request: &BacktestRequest) -> Result<BacktestOutcome> {
        let strategy = self
            .registry
            .get(&request.strategy_id)
            .with_context(|| format!("Unknown strategy: {}", request.strategy_id))?;

        let candles = self
            .data
            .get_candles_range(
                &request.symbol,
                request.timeframe,
                request.start_ts,
                request.end_ts,
            )
            .await?;
        if candles.len() < 2 {
            bail!("Not enough candles for backtest: {} in range", candles.len());
        }

        let funding = if request.funding_enabled {
            self.data
                .get_funding_range(&request.symbol, request.start_ts, request.end_ts)
                .await?
        } else {
            Vec::new()
        };

        // One-strategy registry so the run exercises the real scheduler path.
        let mut sub_registry = StrategyRegistry::new();
        sub_registry.register(strategy.clone());
        let scheduler = PortfolioScheduler::new(request.scheduler.clone());
        let classifier = RegimeClassifier::new(RegimeThresholds::default());
        let slippage = FixedBpsSlippage::new(request.slippage_bps);
        let fees = FeeSchedule::flat(request.fee_rate);
        let perf = PerformanceFeedback::default();

        let tf_ms = request.timeframe.duration_ms();
        let mut book = ReplayBook {
            cash: request.initial_capital,
            open: None,
            trades: Vec::new(),
            positions: Vec::new(),
            strategy_id: request.strategy_id.clone(),
        };
        let mut funding_pnl = Decimal::ZERO;
        let mut peak_equity = request.initial_capital;
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(candles.len());
        let mut decisions: Vec<BacktestDecisionRow> = Vec::new();
        let mut funding_idx = 0usize;

        for i in 0..candles.len() {
            let bar = &candles[i];
            let bar_close_ts = bar.ts + tf_ms;

            // 1. Funding settlements inside this bar.
            while funding_idx < funding.len() && funding[funding_idx].ts <= bar_close_ts {
                let rate = funding[funding_idx].rate;
                funding_idx += 1;
                if let Some(trade) = book.open.as_ref() {
                    // Longs pay positive funding; shorts collect it.
                    let payment = rate * trade.signed_qty * bar.close;
                    book.cash -= payment;
                    funding_pnl -= payment;
                }
            }

            // 2. Manage the open position against this bar.
            if let Some(trade) = book.open.as_mut() {
                trade.bars_held += 1;
                let favorable = if trade.signed_qty > Decimal::ZERO {
                    (bar.high - trade.entry_price).to_f64().unwrap_or(0.0)
                } else {
                    (trade.entry_price - bar.low).to_f64().unwrap_or(0.0)
                };
                trade.peak_favorable = trade.peak_favorable.max(favorable);
            }
            if let Some((exit_price, reason)) = intrabar_exit(&book.open, bar, request) {
                book.close_all(exit_price, bar_close_ts, reason, &slippage, &fees);
            }

            // 3. Mark equity at bar close.
            let equity = book.equity(bar.close);
            peak_equity = peak_equity.max(equity);
            push_equity_point(&mut equity_curve, bar_close_ts, equity, peak_equity);

            // 4. Decide at bar close, fill at next bar open.
            let Some(next_bar) = candles.get(i + 1) else {
                break;
            };

            let snapshot = MarketSnapshot {
                symbol: request.symbol.clone(),
                timeframe: request.timeframe,
                candles: candles[..=i].to_vec(),
                funding: funding
                    .iter()
                    .filter(|f| f.ts <= bar_close_ts)
                    .rev()
                    .take(8)
                    .cloned()
                    .collect(),
                prices: None,
                as_of: bar_close_ts,
            };
            let reading = classifier.classify(&snapshot);
            let signal = strategy.signal(&snapshot);
            let signals = vec![signal.clone()];

            let current_weight = if equity.is_zero() {
                0.0
            } else {
                book.open
                    .as_ref()
                    .map(|t| (t.signed_qty * bar.close / equity).to_f64().unwrap_or(0.0))
                    .unwrap_or(0.0)
            };

            let outcome = scheduler.schedule(
                &sub_registry,
                &ScheduleInput {
                    symbol: &request.symbol,
                    timeframe: request.timeframe,
                    ts: bar_close_ts,
                    signals: &signals,
                    regime: &reading,
                    perf: &perf,
                    current_weight,
                    equity,
                },
            );
            let ScheduleOutcome::Emit(decision) = outcome else {
                continue;
            };
            decisions.push(BacktestDecisionRow {
                ts: decision.ts,
                regime: decision.regime.to_string(),
                target_position: decision.target_position,
                confidence: decision.confidence,
                reasoning: decision.reasoning.clone(),
            });

            let open_price = next_bar.open;
            let current_position = book.open.as_ref().map(|t| {
                let mut p = Position::flat(&request.symbol, bar_close_ts);
                p.side = if t.signed_qty > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                p.size = t.signed_qty.abs();
                p.entry_price = t.entry_price;
                p
            });
            let plan = plan_child_orders(
                &request.symbol,
                decision.target_position,
                current_position.as_ref(),
                equity,
                open_price,
                Decimal::ONE,
                TimeInForce::Gtc,
                false,
            )?;
            let Some(intent) = plan.intents.first().cloned() else {
                continue;
            };

            let risk_ctx = RiskContext {
                equity,
                daily_realized_pnl: Decimal::ZERO,
                consecutive_losses: book.consecutive_losses(),
                bars_since_last_loss: usize::MAX,
                current_position,
            };
            if let Err(violation) = evaluate_rules(&request.risk, &decision, &plan, &risk_ctx) {
                debug!("Risk rule blocked backtest entry at bar {}: {}", i, violation);
                continue;
            }

            // 5. Fill at next bar open.
            let fill_ts = next_bar.ts;
            let position_side = book.open.as_ref().map(|t| t.side());
            let reducing = position_side.map(|s| s != intent.side).unwrap_or(false);

            if reducing {
                book.reduce(intent.amount, open_price, fill_ts, "signal", &slippage, &fees);
            } else if book.open.is_none() {
                let exec_price = slippage.execution_price(open_price, intent.amount, intent.side);
                let fee = fees.fee(intent.amount, exec_price, true);
                book.cash -= fee;

                let atr_series = indicators::atr(
                    &snapshot.highs(),
                    &snapshot.lows(),
                    &snapshot.closes(),
                    14,
                );
                let entry_atr = atr_series.last().copied().unwrap_or(f64::NAN);
                let signed_qty = match intent.side {
                    Side::Buy => intent.amount,
                    Side::Sell => -intent.amount,
                };
                book.open = Some(OpenTrade {
                    signed_qty,
                    entry_price: exec_price,
                    entry_ts: fill_ts,
                    entry_fee: fee,
                    stop: signal.stop,
                    take_profit: signal.take_profit,
                    bars_held: 0,
                    entry_atr: if entry_atr.is_nan() { 0.0 } else { entry_atr },
                    peak_favorable: 0.0,
                });
                book.positions.push(BacktestPositionRow {
                    ts: fill_ts,
                    side: if signed_qty > Decimal::ZERO {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    },
                    size: signed_qty.abs(),
                    entry_price: exec_price,
                });
            } else if let Some(trade) = book.open.as_mut() {
                // Scaling up an existing position: weighted-average entry.
                let exec_price = slippage.execution_price(open_price, intent.amount, intent.side);
                let fee = fees.fee(intent.amount, exec_price, true);
                book.cash -= fee;

                let old_size = trade.signed_qty.abs();
                let add = intent.amount;
                let total = old_size + add;
                trade.entry_price =
                    (trade.entry_price * old_size + exec_price * add) / total;
                trade.signed_qty = match trade.side() {
                    Side::Buy => total,
                    Side::Sell => -total,
                };
                trade.entry_fee += fee;
                if signal.stop.is_some() {
                    trade.stop = signal.stop;
                }
                if signal.take_profit.is_some() {
                    trade.take_profit = signal.take_profit;
                }
                let entry_price = trade.entry_price;
                let side = if trade.signed_qty > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                book.positions.push(BacktestPositionRow {
                    ts: fill_ts,
                    side,
                    size: total,
                    entry_price,
                });
            }
        }

        // Force-close whatever is still open at the end of data.
        if book.open.is_some() {
            let last = candles.last().expect("len checked above");
            book.close_all(
                last.close,
                last.ts + tf_ms,
                "end_of_data",
                &slippage,
                &fees,
            );
            if let Some(point) = equity_curve.last_mut() {
                let equity_f = book.cash.to_f64().unwrap_or(point.equity);
                point.equity = equity_f;
                let peak_f = peak_equity.max(book.cash).to_f64().unwrap_or(equity_f);
                point.drawdown = if peak_f > 0.0 {
                    ((peak_f - equity_f) / peak_f).max(0.0)
                } else {
                    0.0
                };
            }
        }

        let metrics = compute_metrics(
            &equity_curve,
            &book.trades,
            request.initial_capital.to_f64().unwrap_or(0.0),
            request.timeframe.bars_per_year(),
            funding_pnl.to_f64().unwrap_or(0.0),
        );

        let run_id = Uuid::new_v4().to_string();
        let run = BacktestRun {
            run_id: run_id.clone(),
            created_at: Utc::now().timestamp_millis(),
            symbol: request.symbol.clone(),
            timeframe: request.timeframe,
            start_ts: request.start_ts,
            end_ts: request.end_ts,
            initial_capital: request.initial_capital,
            params_json: serde_json::json!({
                "strategy_id": request.strategy_id,
                "fee_rate": request.fee_rate.to_string(),
                "slippage_bps": request.slippage_bps,
                "funding_enabled": request.funding_enabled,
                "time_stop_bars": request.time_stop_bars,
                "seed": request.seed,
            }),
            metrics_json: serde_json::to_value(&metrics)?,
            equity_curve_json: serde_json::to_value(&equity_curve)?,
            schema_version: BACKTEST_SCHEMA_VERSION,
        };
        self.backtests
            .insert_run(&run, &book.trades, &book.positions, &decisions)
            .await?;

        info!(
            "Backtest {} finished: {} trades, final equity {:.2}",
            run_id, metrics.trades_count, metrics.final_equity
        );
        Ok(BacktestOutcome {
            run_id,
            metrics,
            equity_curve,
            trades: book.trades,
        })
    }
}

fn push_equity_point(curve: &mut Vec<EquityPoint>, ts: i64, equity: Decimal, peak: Decimal) {
    let equity_f = equity.to_f64().unwrap_or(0.0);
    let peak_f = peak.to_f64().unwrap_or(equity_f);
    curve.push(EquityPoint {
        ts,
        equity: equity_f,
        drawdown: if peak_f > 0.0 {
            ((peak_f - equity_f) / peak_f).max(0.0)
        } else {
            0.0
        },
    });
}

/// Stop, take-profit and time-stop checks against the current bar. Returns
/// the exit price and reason.
fn intrabar_exit(
    open: &Option<OpenTrade>,
    bar: &Candle,
    request: &BacktestRequest,
) -> Option<(Decimal, &'static str)> {
    let trade = open.as_ref()?;
    let long = trade.signed_qty > Decimal::ZERO;

    if let Some(stop) = trade.stop {
        let hit = if long { bar.low <= stop } else { bar.high >= stop };
        if hit {
            return Some((stop, "stop"));
        }
    }
    if let Some(tp) = trade.take_profit {
        let hit = if long { bar.high >= tp } else { bar.low <= tp };
        if hit {
            return Some((tp, "take_profit"));
        }
    }
    if request.time_stop_bars > 0
        && trade.bars_held >= request.time_stop_bars
        && trade.peak_favorable < trade.entry_atr
    {
        return Some((bar.close, "time_stop"));
    }
    None
}
