use super::{last_valid, signal_ts, Strategy};
use crate::domain::indicators;
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Z-score mean reversion, the deeper-stretch sibling of the band fade. Only
/// fires on extremes beyond `z_entry` and sizes down as volatility rises.
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    pub z_period: usize,
    pub z_entry: f64,
    pub z_exit: f64,
    pub atr_stop_mult: f64,
    pub base_weight: f64,
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self {
            z_period: 30,
            z_entry: 2.5,
            z_exit: 0.3,
            atr_stop_mult: 2.5,
            base_weight: 0.5,
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn id(&self) -> &'static str {
        "mean_reversion"
    }

    fn required_regimes(&self) -> &[Regime] {
        &[Regime::Range]
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);
        if snapshot.len() < self.z_period + 20 {
            return StrategySignal::flat(self.id(), ts, "insufficient data");
        }

        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let i = closes.len() - 1;

        let z = indicators::zscore(&closes, self.z_period);
        let atr = indicators::atr(&highs, &lows, &closes, 14);
        let sma = indicators::sma(&closes, self.z_period);

        let (Some(atr_v), Some(sma_v)) = (last_valid(&atr), last_valid(&sma)) else {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        };
        let z_v = z[i];
        if z_v.is_nan() {
            return StrategySignal::flat(self.id(), ts, "zero-variance window");
        }

        let close = closes[i];
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default();

        if z_v <= -self.z_entry {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Long,
                confidence: (0.55 + (-z_v - self.z_entry) * 0.1).min(0.85),
                target_weight: self.base_weight,
                stop: Some(dec(close - self.atr_stop_mult * atr_v)),
                take_profit: Some(dec(sma_v)),
                reason: format!("z {:.2} below entry threshold", z_v),
            };
        }
        if z_v >= self.z_entry {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Short,
                confidence: (0.55 + (z_v - self.z_entry) * 0.1).min(0.85),
                target_weight: -self.base_weight,
                stop: Some(dec(close + self.atr_stop_mult * atr_v)),
                take_profit: Some(dec(sma_v)),
                reason: format!("z {:.2} above entry threshold", z_v),
            };
        }
        if z_v.abs() <= self.z_exit {
            let mut signal = StrategySignal::flat(self.id(), ts, "reverted to mean");
            signal.intent = if closes[i] >= sma_v {
                SignalIntent::CloseLong
            } else {
                SignalIntent::CloseShort
            };
            return signal;
        }

        StrategySignal::flat(self.id(), ts, "no stretch")
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{candle, flat_tape, snapshot};
    use super::*;

    #[test]
    fn test_deep_flush_goes_long() {
        let mut candles = flat_tape(60, 100.0);
        let n = candles.len();
        candles[n - 2] = candle(n - 2, 99.8, 99.8, 97.5, 97.8, 150.0);
        candles[n - 1] = candle(n - 1, 97.8, 97.9, 96.0, 96.2, 180.0);

        let signal = MeanReversionStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.intent, SignalIntent::Long);
        assert!(signal.take_profit.unwrap() > signal.stop.unwrap());
    }

    #[test]
    fn test_mild_stretch_stays_flat() {
        let mut candles = flat_tape(60, 100.0);
        let n = candles.len();
        candles[n - 1] = candle(n - 1, 100.0, 100.1, 99.3, 99.4, 110.0);

        let signal = MeanReversionStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.target_weight, 0.0);
    }
}
