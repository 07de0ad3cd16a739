use crate::domain::errors::RiskViolation;
use crate::domain::repositories::RiskEventRepository;
use crate::domain::types::{Decision, OrderIntent, Position, RiskEvent, RiskLevel, Trade};
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub trading_enabled: bool,
    pub min_confidence: f64,
    pub max_notional: Decimal,
    pub max_leverage: Decimal,
    pub max_daily_loss_pct: f64,
    pub cooldown_losses: usize,
    pub cooldown_bars: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            trading_enabled: true,
            min_confidence: 0.55,
            max_notional: Decimal::from(100_000),
            max_leverage: Decimal::from(3),
            max_daily_loss_pct: 3.0,
            cooldown_losses: 3,
            cooldown_bars: 12,
        }
    }
}

/// What the executor would do if the decision passes: the child orders plus
/// the aggregate exposure they produce.
#[derive(Debug, Clone)]
pub struct OrderPlan {
    pub intents: Vec<OrderIntent>,
    pub target_weight: f64,
    pub gross_notional: Decimal,
    pub leverage: Decimal,
    /// False when the plan only reduces or closes exposure. Closes stay
    /// allowed under the daily-loss block and the cooldown.
    pub is_increasing: bool,
    /// True when orders would route to the real venue.
    pub live_routing: bool,
}

#[derive(Debug, Clone)]
pub struct RiskContext {
    pub equity: Decimal,
    pub daily_realized_pnl: Decimal,
    pub consecutive_losses: usize,
    pub bars_since_last_loss: usize,
    pub current_position: Option<Position>,
}

/// Number of consecutive losing closes at the head of a newest-first trade
/// list. Feeds the cooldown rule.
pub fn loss_streak(trades_newest_first: &[Trade]) -> usize {
    trades_newest_first
        .iter()
        .filter_map(|t| t.realized_pnl)
        .take_while(|pnl| *pnl < Decimal::ZERO)
        .count()
}

/// Applied between the scheduler and the executor. All checks must pass; any
/// failure records a `RiskEvent(BLOCK, rule)` and drops the decision. The
/// next cycle proceeds normally.
pub struct RiskGate {
    limits: RiskLimits,
    risk_events: Arc<dyn RiskEventRepository>,
}

impl RiskGate {
    pub fn new(limits: RiskLimits, risk_events: Arc<dyn RiskEventRepository>) -> Self {
        Self {
            limits,
            risk_events,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Returns whether the plan may proceed. A block is persisted before this
    /// returns false.
    pub async fn evaluate(
        &self,
        decision: &Decision,
        plan: &OrderPlan,
        ctx: &RiskContext,
    ) -> Result<bool> {
        match self.check(decision, plan, ctx) {
            Ok(()) => Ok(true),
            Err(violation) => {
                warn!("Risk gate blocked decision: {}", violation);
                self.risk_events
                    .insert(&RiskEvent {
                        ts: decision.ts,
                        symbol: decision.symbol.clone(),
                        level: RiskLevel::Block,
                        rule: violation.rule_code().to_string(),
                        details: violation.to_string(),
                    })
                    .await?;
                Ok(false)
            }
        }
    }

    fn check(
        &self,
        decision: &Decision,
        plan: &OrderPlan,
        ctx: &RiskContext,
    ) -> Result<(), RiskViolation> {
        evaluate_rules(&self.limits, decision, plan, ctx)
    }
}

/// The rule set itself, shared verbatim by the live gate and the backtest
/// engine.
pub fn evaluate_rules(
    limits: &RiskLimits,
    decision: &Decision,
    plan: &OrderPlan,
    ctx: &RiskContext,
) -> Result<(), RiskViolation> {
    if plan.live_routing && !limits.trading_enabled {
        return Err(RiskViolation::TradingDisabled);
    }

    if decision.confidence < limits.min_confidence {
        return Err(RiskViolation::MinConfidence {
            confidence: decision.confidence,
            min: limits.min_confidence,
        });
    }

    if plan.gross_notional > limits.max_notional {
        return Err(RiskViolation::MaxNotional {
            notional: plan.gross_notional,
            max: limits.max_notional,
        });
    }

    if plan.leverage > limits.max_leverage {
        return Err(RiskViolation::Leverage {
            leverage: plan.leverage,
            max: limits.max_leverage,
        });
    }

    if plan.is_increasing {
        if ctx.daily_realized_pnl < Decimal::ZERO && ctx.equity > Decimal::ZERO {
            let loss_pct = (-ctx.daily_realized_pnl / ctx.equity * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0);
            if loss_pct > limits.max_daily_loss_pct {
                return Err(RiskViolation::DailyLoss {
                    loss_pct,
                    limit_pct: limits.max_daily_loss_pct,
                });
            }
        }

        if limits.cooldown_losses > 0
            && ctx.consecutive_losses >= limits.cooldown_losses
            && ctx.bars_since_last_loss < limits.cooldown_bars
        {
            return Err(RiskViolation::Cooldown {
                losses: ctx.consecutive_losses,
                bars_left: limits.cooldown_bars - ctx.bars_since_last_loss,
            });
        }

        // One position per symbol: an increasing plan must not run against an
        // open position on the other side.
        if let Some(position) = &ctx.current_position {
            if !position.is_flat() {
                let current_sign = position.signed_size();
                let opposing = (current_sign > Decimal::ZERO && plan.target_weight < 0.0)
                    || (current_sign < Decimal::ZERO && plan.target_weight > 0.0);
                if opposing {
                    return Err(RiskViolation::ExclusivePosition {
                        symbol: decision.symbol.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
