use super::{signal_ts, Strategy, ALL_REGIMES};
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::ToPrimitive;

/// Funding-rate harvesting.
///
/// When the 8h funding rate stays rich for at least `sustained_periods`
/// settlements and the perp tracks its index closely, shorts the perp to
/// collect funding. The spot hedge leg is out of scope for the single-symbol
/// core, so the position is sized small and exits as soon as funding decays
/// or the basis blows out.
#[derive(Debug, Clone)]
pub struct FundingArbStrategy {
    pub entry_rate: f64,
    pub exit_rate: f64,
    pub sustained_periods: usize,
    pub max_entry_basis: f64,
    pub exit_basis: f64,
    pub base_weight: f64,
}

impl Default for FundingArbStrategy {
    fn default() -> Self {
        Self {
            entry_rate: 0.001,
            exit_rate: 0.0005,
            sustained_periods: 2,
            max_entry_basis: 0.005,
            exit_basis: 0.015,
            base_weight: 0.3,
        }
    }
}

impl Strategy for FundingArbStrategy {
    fn id(&self) -> &'static str {
        "funding_arb"
    }

    fn required_regimes(&self) -> &[Regime] {
        ALL_REGIMES
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);

        if snapshot.funding.len() < self.sustained_periods {
            return StrategySignal::flat(self.id(), ts, "insufficient funding history");
        }
        let Some(basis) = snapshot
            .prices
            .as_ref()
            .and_then(|p| p.basis())
            .and_then(|b| b.to_f64())
        else {
            return StrategySignal::flat(self.id(), ts, "no basis available");
        };

        let rates: Vec<f64> = snapshot
            .funding
            .iter()
            .take(self.sustained_periods)
            .filter_map(|f| f.rate.to_f64())
            .collect();
        if rates.len() < self.sustained_periods {
            return StrategySignal::flat(self.id(), ts, "insufficient funding history");
        }
        let current = rates[0];

        // Exit conditions dominate: decayed carry or a runaway basis.
        if current < self.exit_rate || basis.abs() > self.exit_basis {
            let mut signal = StrategySignal::flat(
                self.id(),
                ts,
                format!("carry off: funding {:.4}, basis {:.4}", current, basis),
            );
            signal.intent = SignalIntent::CloseShort;
            signal.confidence = 0.5;
            return signal;
        }

        let sustained = rates.iter().all(|r| *r > self.entry_rate);
        if sustained && basis.abs() < self.max_entry_basis {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Short,
                confidence: (0.55 + current * 100.0).min(0.9),
                target_weight: -self.base_weight,
                stop: None,
                take_profit: None,
                reason: format!(
                    "funding {:.4} sustained {} periods, basis {:.4}",
                    current, self.sustained_periods, basis
                ),
            };
        }

        StrategySignal::flat(self.id(), ts, "funding not rich enough")
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{flat_tape, snapshot, with_funding, with_prices};
    use super::*;

    #[test]
    fn test_rich_sustained_funding_shorts_perp() {
        let snap = with_prices(
            with_funding(snapshot(flat_tape(10, 50000.0)), &[0.0015, 0.0012]),
            50000.0,
            50010.0,
            50000.0,
        );
        let signal = FundingArbStrategy::default().signal(&snap);
        assert_eq!(signal.intent, SignalIntent::Short);
        assert!(signal.target_weight < 0.0);
    }

    #[test]
    fn test_single_rich_period_is_not_enough() {
        let snap = with_prices(
            with_funding(snapshot(flat_tape(10, 50000.0)), &[0.0015, 0.0004]),
            50000.0,
            50010.0,
            50000.0,
        );
        let signal = FundingArbStrategy::default().signal(&snap);
        assert!(signal.is_flat());
    }

    #[test]
    fn test_wide_basis_blocks_entry() {
        // 1% basis > 0.5% entry cap.
        let snap = with_prices(
            with_funding(snapshot(flat_tape(10, 50000.0)), &[0.0015, 0.0012]),
            50500.0,
            50500.0,
            50000.0,
        );
        let signal = FundingArbStrategy::default().signal(&snap);
        assert_ne!(signal.intent, SignalIntent::Short);
    }

    #[test]
    fn test_decayed_funding_exits() {
        let snap = with_prices(
            with_funding(snapshot(flat_tape(10, 50000.0)), &[0.0002, 0.0012]),
            50000.0,
            50010.0,
            50000.0,
        );
        let signal = FundingArbStrategy::default().signal(&snap);
        assert_eq!(signal.intent, SignalIntent::CloseShort);
    }
}
