use super::{last_valid, signal_ts, Strategy};
use crate::domain::indicators;
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Rate-of-change momentum rider for established trends. Enters with the
/// move when N-bar momentum, RSI and the MACD histogram all agree.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    pub momentum_bars: usize,
    pub momentum_entry: f64,
    pub rsi_long_min: f64,
    pub rsi_short_max: f64,
    pub stop_atr: f64,
    pub take_profit_atr: f64,
    pub base_weight: f64,
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self {
            momentum_bars: 10,
            momentum_entry: 0.015,
            rsi_long_min: 58.0,
            rsi_short_max: 42.0,
            stop_atr: 2.0,
            take_profit_atr: 4.0,
            base_weight: 0.7,
        }
    }
}

impl Strategy for MomentumStrategy {
    fn id(&self) -> &'static str {
        "momentum"
    }

    fn required_regimes(&self) -> &[Regime] {
        &[Regime::Trend, Regime::Breakout]
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);
        if snapshot.len() < 60 {
            return StrategySignal::flat(self.id(), ts, "insufficient data");
        }

        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let i = closes.len() - 1;

        let rsi = indicators::rsi(&closes, 14);
        let macd = indicators::macd(&closes, 12, 26, 9);
        let atr = indicators::atr(&highs, &lows, &closes, 14);

        let (Some(rsi_v), Some(atr_v)) = (last_valid(&rsi), last_valid(&atr)) else {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        };
        let hist = macd.histogram[i];
        if hist.is_nan() {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        }

        let close = closes[i];
        let anchor = closes[i - self.momentum_bars];
        if anchor == 0.0 {
            return StrategySignal::flat(self.id(), ts, "degenerate anchor price");
        }
        let momentum = close / anchor - 1.0;
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default();

        if momentum > self.momentum_entry && rsi_v > self.rsi_long_min && hist > 0.0 {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Long,
                confidence: (0.6 + momentum * 5.0).min(0.9),
                target_weight: self.base_weight,
                stop: Some(dec(close - self.stop_atr * atr_v)),
                take_profit: Some(dec(close + self.take_profit_atr * atr_v)),
                reason: format!("momentum {:.3} over {} bars, RSI {:.1}", momentum, self.momentum_bars, rsi_v),
            };
        }
        if momentum < -self.momentum_entry && rsi_v < self.rsi_short_max && hist < 0.0 {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Short,
                confidence: (0.6 - momentum * 5.0).min(0.9),
                target_weight: -self.base_weight,
                stop: Some(dec(close + self.stop_atr * atr_v)),
                take_profit: Some(dec(close - self.take_profit_atr * atr_v)),
                reason: format!("momentum {:.3} over {} bars, RSI {:.1}", momentum, self.momentum_bars, rsi_v),
            };
        }

        StrategySignal::flat(self.id(), ts, "no momentum edge")
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{candle, snapshot};
    use super::*;

    #[test]
    fn test_strong_advance_goes_long() {
        let candles: Vec<_> = (0..80)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.5;
                candle(i, p, p + 0.6, p - 0.3, p + 0.45, 100.0)
            })
            .collect();
        let signal = MomentumStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.intent, SignalIntent::Long);
        assert!(signal.confidence <= 0.9);
    }

    #[test]
    fn test_strong_decline_goes_short() {
        let candles: Vec<_> = (0..80)
            .map(|i| {
                let p = 200.0 - i as f64 * 0.5;
                candle(i, p, p + 0.3, p - 0.6, p - 0.45, 100.0)
            })
            .collect();
        let signal = MomentumStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.intent, SignalIntent::Short);
        assert!(signal.target_weight < 0.0);
    }

    #[test]
    fn test_flat_tape_has_no_edge() {
        let candles: Vec<_> = (0..80)
            .map(|i| candle(i, 100.0, 100.3, 99.7, 100.0, 100.0))
            .collect();
        let signal = MomentumStrategy::default().signal(&snapshot(candles));
        assert!(signal.is_flat());
    }
}
