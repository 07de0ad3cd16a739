use crate::application::decision::PerformanceFeedback;
use crate::application::strategies::StrategyRegistry;
use crate::domain::regime::{Regime, RegimeReading};
use crate::domain::repositories::{DecisionRepository, OrderRepository};
use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Allocation, Decision, SignalIntent, StrategySignal};
use anyhow::Result;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Fixed affinity of each strategy for each regime; the `w_r` half of the
/// scheduler score.
fn regime_score(strategy_id: &str, regime: Regime) -> f64 {
    match (strategy_id, regime) {
        ("ema_trend", Regime::Trend) => 1.0,
        ("momentum", Regime::Trend) => 0.8,
        ("momentum", Regime::Breakout) => 0.7,
        ("breakout", Regime::Breakout) => 1.0,
        ("bollinger_range", Regime::Range) => 1.0,
        ("mean_reversion", Regime::Range) => 0.8,
        ("grid", Regime::Range) => 0.7,
        ("funding_arb", _) => 0.6,
        _ => 0.4,
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub top_k: usize,
    /// `w_r`; the performance weight is `1 - w_r`.
    pub regime_weight: f64,
    pub global_leverage: f64,
    pub min_notional: Decimal,
    pub diff_threshold_bps: f64,
    pub perf_lookback: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            regime_weight: 0.6,
            global_leverage: 1.0,
            min_notional: Decimal::from(100),
            diff_threshold_bps: 100.0,
            perf_lookback: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Hold { reason: String },
    Emit(Decision),
}

pub struct ScheduleInput<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub ts: i64,
    pub signals: &'a [StrategySignal],
    pub regime: &'a RegimeReading,
    pub perf: &'a PerformanceFeedback,
    /// Signed fraction of equity currently exposed.
    pub current_weight: f64,
    pub equity: Decimal,
}

/// The canonical, always-available allocator. The LLM path, when enabled and
/// valid, replaces only the weight assignment; everything downstream is
/// identical.
pub struct PortfolioScheduler {
    config: SchedulerConfig,
}

impl PortfolioScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Normalized performance score in [0, 1] per strategy: min-max over
    /// lookback PnL, 0.5 when nothing is known.
    fn performance_scores(&self, perf: &PerformanceFeedback) -> HashMap<String, f64> {
        let pnls = &perf.pnl_by_strategy;
        let mut scores = HashMap::new();
        if pnls.is_empty() {
            return scores;
        }
        let min = pnls.values().cloned().fold(f64::MAX, f64::min);
        let max = pnls.values().cloned().fold(f64::MIN, f64::max);
        for (id, pnl) in pnls {
            let score = if (max - min).abs() < f64::EPSILON {
                0.5
            } else {
                (pnl - min) / (max - min)
            };
            scores.insert(id.clone(), score);
        }
        scores
    }

    pub fn schedule(&self, registry: &StrategyRegistry, input: &ScheduleInput<'_>) -> ScheduleOutcome {
        let regime = input.regime.regime;
        let perf_scores = self.performance_scores(input.perf);

        // 1. Regime filter.
        let eligible: Vec<&StrategySignal> = input
            .signals
            .iter()
            .filter(|s| {
                registry
                    .get(&s.strategy_id)
                    .map(|strategy| strategy.required_regimes().contains(&regime))
                    .unwrap_or(false)
            })
            .collect();

        let entries: Vec<&StrategySignal> = eligible
            .iter()
            .copied()
            .filter(|s| {
                matches!(s.intent, SignalIntent::Long | SignalIntent::Short)
                    && s.target_weight != 0.0
            })
            .collect();

        // Exit intents are honored from any strategy, eligible or not: a
        // regime flip must offer the outgoing strategy its exit before a
        // conflicting one opens.
        let close_long = input
            .signals
            .iter()
            .any(|s| s.intent == SignalIntent::CloseLong);
        let close_short = input
            .signals
            .iter()
            .any(|s| s.intent == SignalIntent::CloseShort);
        let exit_requested = (input.current_weight > 0.0 && close_long)
            || (input.current_weight < 0.0 && close_short);

        if entries.is_empty() {
            if input.current_weight != 0.0 && exit_requested {
                return self.emit_target(input, 0.0, Vec::new(), 0.6, "exit: close signal".to_string());
            }
            return ScheduleOutcome::Hold {
                reason: format!("no eligible entries in regime {}", regime),
            };
        }

        // 2. Score and pick top-K.
        let w_r = self.config.regime_weight;
        let mut scored: Vec<(&StrategySignal, f64)> = entries
            .iter()
            .map(|s| {
                let rs = regime_score(&s.strategy_id, regime);
                let ps = perf_scores.get(&s.strategy_id).copied().unwrap_or(0.5);
                (*s, rs * w_r + ps * (1.0 - w_r))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_k);

        // 3. Normalize weights to sum 1.
        let score_sum: f64 = scored.iter().map(|(_, score)| score).sum();
        if score_sum <= 0.0 {
            return ScheduleOutcome::Hold {
                reason: "all scores zero".to_string(),
            };
        }
        let allocations: Vec<(Allocation, f64)> = scored
            .iter()
            .map(|(signal, score)| {
                (
                    Allocation {
                        strategy_id: signal.strategy_id.clone(),
                        weight: score / score_sum,
                        confidence: signal.confidence,
                    },
                    signal.target_weight,
                )
            })
            .collect();

        // 4. Combine direction and clamp.
        let mut target: f64 = allocations
            .iter()
            .map(|(allocation, signal_weight)| allocation.weight * signal_weight)
            .sum();
        let cap = self.config.global_leverage;
        target = target.clamp(-cap, cap);

        // 5. Exclusivity: flipping sides must fully close first.
        if target != 0.0
            && input.current_weight != 0.0
            && target.signum() != input.current_weight.signum()
        {
            let reasoning = "flip requested: closing existing position first".to_string();
            let confidence = allocations
                .iter()
                .map(|(a, _)| a.weight * a.confidence)
                .sum::<f64>();
            let allocs = allocations.into_iter().map(|(a, _)| a).collect();
            return self.emit_target(input, 0.0, allocs, confidence, reasoning);
        }

        let confidence: f64 = allocations
            .iter()
            .map(|(a, _)| a.weight * a.confidence)
            .sum();
        let reasoning = allocations
            .iter()
            .map(|(a, _)| format!("{} w={:.2}", a.strategy_id, a.weight))
            .collect::<Vec<_>>()
            .join(", ");
        let allocs: Vec<Allocation> = allocations.into_iter().map(|(a, _)| a).collect();

        self.emit_target(input, target, allocs, confidence, reasoning)
    }

    /// Emit only when the change clears both the notional floor and the
    /// basis-point threshold; otherwise HOLD.
    fn emit_target(
        &self,
        input: &ScheduleInput<'_>,
        target: f64,
        allocations: Vec<Allocation>,
        confidence: f64,
        reasoning: String,
    ) -> ScheduleOutcome {
        let delta = (target - input.current_weight).abs();
        let delta_notional = Decimal::from_f64(delta).unwrap_or_default() * input.equity;

        if delta_notional < self.config.min_notional {
            return ScheduleOutcome::Hold {
                reason: format!(
                    "delta notional {} below floor {}",
                    delta_notional.round_dp(2),
                    self.config.min_notional
                ),
            };
        }
        if delta * 10_000.0 < self.config.diff_threshold_bps {
            return ScheduleOutcome::Hold {
                reason: format!(
                    "delta {:.1} bps below threshold {:.1}",
                    delta * 10_000.0,
                    self.config.diff_threshold_bps
                ),
            };
        }

        debug!(
            "Scheduler target {:.3} (current {:.3}) via {} allocations",
            target,
            input.current_weight,
            allocations.len()
        );
        ScheduleOutcome::Emit(Decision {
            ts: input.ts,
            symbol: input.symbol.to_string(),
            timeframe: input.timeframe,
            regime: input.regime.regime,
            allocations,
            target_position: target,
            confidence,
            reasoning,
            prompt_version: None,
            model_version: None,
        })
    }
}

/// Builds decision feedback from persisted trades and decisions. Each closing
/// trade's realized PnL is attributed to the allocations of the most recent
/// decision at or before the trade.
pub struct PerformanceTracker {
    orders: Arc<dyn OrderRepository>,
    decisions: Arc<dyn DecisionRepository>,
    lookback: usize,
}

impl PerformanceTracker {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        decisions: Arc<dyn DecisionRepository>,
        lookback: usize,
    ) -> Self {
        Self {
            orders,
            decisions,
            lookback,
        }
    }

    pub async fn feedback(&self, symbol: &str) -> Result<PerformanceFeedback> {
        let trades = self
            .orders
            .recent_closing_trades(symbol, self.lookback)
            .await?;
        let decisions = self
            .decisions
            .recent_decisions(symbol, self.lookback)
            .await?;

        let mut pnl_by_strategy: HashMap<String, f64> = HashMap::new();
        let mut wins = 0usize;
        for trade in &trades {
            let pnl = trade
                .realized_pnl
                .and_then(|p| p.to_f64())
                .unwrap_or(0.0);
            if pnl > 0.0 {
                wins += 1;
            }
            // Newest-first decisions: first with ts <= trade.ts was active.
            if let Some(decision) = decisions.iter().find(|d| d.ts <= trade.ts) {
                for allocation in &decision.allocations {
                    *pnl_by_strategy
                        .entry(allocation.strategy_id.clone())
                        .or_insert(0.0) += pnl * allocation.weight;
                }
            }
        }

        Ok(PerformanceFeedback {
            win_rate: if trades.is_empty() {
                0.0
            } else {
                wins as f64 / trades.len() as f64
            },
            closed_trades: trades.len(),
            pnl_by_strategy,
        })
    }
}
