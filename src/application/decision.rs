use crate::domain::ports::LlmAdapter;
use crate::domain::regime::RegimeReading;
use crate::domain::repositories::DecisionRepository;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::LlmRun;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const PROMPT_VERSION: &str = "v3";

const WEIGHT_SUM_TOLERANCE: f64 = 0.05;

/// Per-strategy feedback fed into the prompt and the scheduler's performance
/// score. PnL figures are in quote currency over the lookback window.
#[derive(Debug, Clone, Default)]
pub struct PerformanceFeedback {
    pub win_rate: f64,
    pub closed_trades: usize,
    pub pnl_by_strategy: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProposalAllocation {
    pub strategy_id: String,
    pub weight: f64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// The shape the model must return. Anything that fails validation falls back
/// to the deterministic portfolio scheduler.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AllocationProposal {
    pub market_regime: String,
    pub strategy_allocations: Vec<ProposalAllocation>,
    pub total_position: f64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Tagged outcome; no "maybe a dict" paths downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    Proposal(AllocationProposal),
    Rejected(String),
}

/// Optional LLM allocator. Every call is audited to `llm_runs` with the raw
/// request, response, latency and outcome.
pub struct LlmAllocator {
    adapter: Arc<dyn LlmAdapter>,
    decisions: Arc<dyn DecisionRepository>,
    provider: String,
}

impl LlmAllocator {
    pub fn new(
        adapter: Arc<dyn LlmAdapter>,
        decisions: Arc<dyn DecisionRepository>,
        provider: String,
    ) -> Self {
        Self {
            adapter,
            decisions,
            provider,
        }
    }

    pub fn model_version(&self) -> String {
        self.adapter.model_version()
    }

    pub async fn propose(
        &self,
        snapshot: &MarketSnapshot,
        regime: &RegimeReading,
        enabled: &[String],
        feedback: &PerformanceFeedback,
    ) -> Result<ProposalOutcome> {
        let prompt = self.build_prompt(snapshot, regime, enabled, feedback);
        let started = Instant::now();
        let result = self.adapter.propose(&prompt).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let (outcome, response) = match result {
            Err(e) => {
                warn!("LLM call failed: {:#}", e);
                (ProposalOutcome::Rejected(format!("call failed: {}", e)), None)
            }
            Ok(value) => {
                let response = value.to_string();
                let outcome = match serde_json::from_value::<AllocationProposal>(value) {
                    Err(e) => ProposalOutcome::Rejected(format!("schema mismatch: {}", e)),
                    Ok(proposal) => match Self::validate(&proposal, enabled) {
                        Ok(()) => ProposalOutcome::Proposal(proposal),
                        Err(reason) => ProposalOutcome::Rejected(reason),
                    },
                };
                (outcome, Some(response))
            }
        };

        let outcome_label = match &outcome {
            ProposalOutcome::Proposal(_) => "ACCEPTED".to_string(),
            ProposalOutcome::Rejected(reason) => format!("REJECTED: {}", reason),
        };
        self.decisions
            .record_llm_run(&LlmRun {
                ts: Utc::now().timestamp_millis(),
                provider: self.provider.clone(),
                model: self.adapter.model_version(),
                prompt,
                response,
                latency_ms,
                outcome: outcome_label.clone(),
            })
            .await?;

        if let ProposalOutcome::Rejected(reason) = &outcome {
            info!("LLM proposal rejected, falling back to scheduler: {}", reason);
        }
        Ok(outcome)
    }

    /// Every rule failing rejects the whole proposal.
    fn validate(proposal: &AllocationProposal, enabled: &[String]) -> Result<(), String> {
        if proposal.strategy_allocations.is_empty() {
            return Err("no allocations".to_string());
        }

        let weight_sum: f64 = proposal.strategy_allocations.iter().map(|a| a.weight).sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("weights sum to {:.3}, expected 1.0", weight_sum));
        }
        for allocation in &proposal.strategy_allocations {
            if allocation.weight < 0.0 {
                return Err(format!(
                    "negative weight {:.3} for {}",
                    allocation.weight, allocation.strategy_id
                ));
            }
            if !enabled.contains(&allocation.strategy_id) {
                return Err(format!("unknown strategy {}", allocation.strategy_id));
            }
            if !(0.0..=1.0).contains(&allocation.confidence) {
                return Err(format!(
                    "confidence {:.3} out of range for {}",
                    allocation.confidence, allocation.strategy_id
                ));
            }
        }
        if !(-1.0..=1.0).contains(&proposal.total_position) {
            return Err(format!(
                "total_position {:.3} out of [-1, 1]",
                proposal.total_position
            ));
        }
        if !(0.0..=1.0).contains(&proposal.confidence) {
            return Err(format!("confidence {:.3} out of [0, 1]", proposal.confidence));
        }
        Ok(())
    }

    fn build_prompt(
        &self,
        snapshot: &MarketSnapshot,
        regime: &RegimeReading,
        enabled: &[String],
        feedback: &PerformanceFeedback,
    ) -> String {
        let closes = snapshot.closes();
        let tail: Vec<String> = closes
            .iter()
            .rev()
            .take(20)
            .rev()
            .map(|c| format!("{:.1}", c))
            .collect();
        let funding = snapshot
            .latest_funding()
            .and_then(|f| f.rate.to_f64())
            .unwrap_or(0.0);
        let pnl_lines: Vec<String> = feedback
            .pnl_by_strategy
            .iter()
            .map(|(id, pnl)| format!("  {}: {:.2}", id, pnl))
            .collect();

        format!(
            concat!(
                "Allocate capital across trading strategies for {symbol} ({timeframe}).\n",
                "Market regime: {regime} (ADX {adx:.1}, BB width {bbw:.4}, ATR% {atrp:.4})\n",
                "Last closes: {closes}\n",
                "Funding rate (8h): {funding:.5}\n",
                "Recent performance: win rate {win_rate:.2} over {trades} closed trades\n",
                "PnL by strategy:\n{pnl}\n",
                "Enabled strategies: {enabled}\n",
                "Respond with JSON: {{\"market_regime\": str, \"strategy_allocations\": ",
                "[{{\"strategy_id\": str, \"weight\": float, \"confidence\": float, ",
                "\"reasoning\": str}}], \"total_position\": float in [-1,1], ",
                "\"confidence\": float in [0,1], \"reasoning\": str}}. ",
                "Weights must be non-negative and sum to 1.0. ",
                "Only use enabled strategy ids. (prompt {version})"
            ),
            symbol = snapshot.symbol,
            timeframe = snapshot.timeframe,
            regime = regime.regime,
            adx = regime.adx,
            bbw = regime.bb_width,
            atrp = regime.atr_pct,
            closes = tail.join(", "),
            funding = funding,
            win_rate = feedback.win_rate,
            trades = feedback.closed_trades,
            pnl = if pnl_lines.is_empty() {
                "  (none)".to_string()
            } else {
                pnl_lines.join("\n")
            },
            enabled = enabled.join(", "),
            version = PROMPT_VERSION,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(weights: &[(&str, f64)], total: f64, confidence: f64) -> AllocationProposal {
        AllocationProposal {
            market_regime: "TREND".to_string(),
            strategy_allocations: weights
                .iter()
                .map(|(id, w)| ProposalAllocation {
                    strategy_id: id.to_string(),
                    weight: *w,
                    confidence: 0.7,
                    reasoning: String::new(),
                })
                .collect(),
            total_position: total,
            confidence,
            reasoning: String::new(),
        }
    }

    fn enabled() -> Vec<String> {
        vec!["ema_trend".to_string(), "momentum".to_string()]
    }

    #[test]
    fn test_valid_proposal_passes() {
        let p = proposal(&[("ema_trend", 0.6), ("momentum", 0.4)], 0.5, 0.8);
        assert!(LlmAllocator::validate(&p, &enabled()).is_ok());
    }

    #[test]
    fn test_weight_sum_tolerance() {
        let p = proposal(&[("ema_trend", 0.6), ("momentum", 0.43)], 0.5, 0.8);
        assert!(LlmAllocator::validate(&p, &enabled()).is_ok());

        let p = proposal(&[("ema_trend", 0.6), ("momentum", 0.5)], 0.5, 0.8);
        assert!(LlmAllocator::validate(&p, &enabled()).is_err());
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let p = proposal(&[("ema_trend", 0.5), ("smc", 0.5)], 0.5, 0.8);
        let err = LlmAllocator::validate(&p, &enabled()).unwrap_err();
        assert!(err.contains("smc"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let p = proposal(&[("ema_trend", 1.5), ("momentum", -0.5)], 0.5, 0.8);
        assert!(LlmAllocator::validate(&p, &enabled()).is_err());
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let p = proposal(&[("ema_trend", 1.0)], 1.5, 0.8);
        assert!(LlmAllocator::validate(&p, &enabled()).is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let p = proposal(&[("ema_trend", 1.0)], 0.5, 1.2);
        assert!(LlmAllocator::validate(&p, &enabled()).is_err());
    }

    #[test]
    fn test_proposal_deserializes_from_model_json() {
        let raw = serde_json::json!({
            "market_regime": "RANGE",
            "strategy_allocations": [
                {"strategy_id": "bollinger_range", "weight": 1.0, "confidence": 0.6, "reasoning": "quiet tape"}
            ],
            "total_position": -0.2,
            "confidence": 0.6,
            "reasoning": "fade the range"
        });
        let parsed: AllocationProposal = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.strategy_allocations.len(), 1);
        assert_eq!(parsed.total_position, -0.2);
    }
}
