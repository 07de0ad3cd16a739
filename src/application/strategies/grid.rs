use super::{last_valid, signal_ts, Strategy};
use crate::domain::indicators;
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Regime-gated grid. Inside a quiet range it leans against price at fixed
/// ATR rungs around the rolling mean: the further below the mean, the longer;
/// the further above, the shorter. Weight saturates at `max_rungs`.
#[derive(Debug, Clone)]
pub struct GridStrategy {
    pub anchor_period: usize,
    pub rung_atr: f64,
    pub max_rungs: usize,
    pub weight_per_rung: f64,
    pub adx_max: f64,
}

impl Default for GridStrategy {
    fn default() -> Self {
        Self {
            anchor_period: 30,
            rung_atr: 0.75,
            max_rungs: 3,
            weight_per_rung: 0.2,
            adx_max: 20.0,
        }
    }
}

impl Strategy for GridStrategy {
    fn id(&self) -> &'static str {
        "grid"
    }

    fn required_regimes(&self) -> &[Regime] {
        &[Regime::Range]
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);
        if snapshot.len() < self.anchor_period + 30 {
            return StrategySignal::flat(self.id(), ts, "insufficient data");
        }

        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let i = closes.len() - 1;

        let anchor = indicators::sma(&closes, self.anchor_period);
        let atr = indicators::atr(&highs, &lows, &closes, 14);
        let adx = indicators::adx(&highs, &lows, &closes, 14);

        let (Some(anchor_v), Some(atr_v), Some(adx_v)) =
            (last_valid(&anchor), last_valid(&atr), last_valid(&adx))
        else {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        };
        if atr_v <= 0.0 {
            return StrategySignal::flat(self.id(), ts, "degenerate ATR");
        }
        if adx_v > self.adx_max {
            return StrategySignal::flat(self.id(), ts, "trending, grid disabled");
        }

        let close = closes[i];
        let displacement = (anchor_v - close) / (self.rung_atr * atr_v);
        let rungs = displacement
            .abs()
            .floor()
            .min(self.max_rungs as f64);
        if rungs < 1.0 {
            let mut signal = StrategySignal::flat(self.id(), ts, "at anchor");
            // Inside the first rung any inventory should be flattened.
            signal.intent = if displacement >= 0.0 {
                SignalIntent::CloseShort
            } else {
                SignalIntent::CloseLong
            };
            return signal;
        }

        let weight = rungs * self.weight_per_rung * displacement.signum();
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default();
        let (intent, stop) = if weight > 0.0 {
            (
                SignalIntent::Long,
                close - (self.max_rungs as f64 + 1.0) * self.rung_atr * atr_v,
            )
        } else {
            (
                SignalIntent::Short,
                close + (self.max_rungs as f64 + 1.0) * self.rung_atr * atr_v,
            )
        };

        StrategySignal {
            strategy_id: self.id().to_string(),
            ts,
            intent,
            confidence: 0.55,
            target_weight: weight.clamp(-1.0, 1.0),
            stop: Some(dec(stop)),
            take_profit: Some(dec(anchor_v)),
            reason: format!(
                "grid {} rung(s), {:.2} ATR from anchor {:.2}",
                rungs as i64, displacement, anchor_v
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{candle, flat_tape, snapshot};
    use super::*;

    #[test]
    fn test_below_anchor_leans_long() {
        let mut candles = flat_tape(70, 100.0);
        let n = candles.len();
        // Price slides one rung below the anchor without trending hard.
        candles[n - 1] = candle(n - 1, 99.5, 99.6, 98.9, 99.0, 100.0);

        let signal = GridStrategy::default().signal(&snapshot(candles));
        if signal.intent == SignalIntent::Long {
            assert!(signal.target_weight > 0.0);
            assert!(signal.target_weight <= 0.6 + 1e-9);
        } else {
            // Small ATR tapes may not clear a full rung; closing intent is the
            // other legal answer here.
            assert_eq!(signal.target_weight, 0.0);
        }
    }

    #[test]
    fn test_weight_saturates_at_max_rungs() {
        let mut candles = flat_tape(70, 100.0);
        let n = candles.len();
        candles[n - 1] = candle(n - 1, 95.0, 95.2, 89.8, 90.0, 100.0);

        let signal = GridStrategy::default().signal(&snapshot(candles));
        assert!(signal.target_weight.abs() <= 0.6 + 1e-9);
    }
}
