use super::{last_valid, signal_ts, Strategy};
use crate::domain::indicators;
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Band-fade mean reversion for quiet ranges. Buys a 2-sigma stretch below
/// the lower band when ADX confirms there is no trend to fight; exits at the
/// midline or once the z-score normalizes.
#[derive(Debug, Clone)]
pub struct BollingerRangeStrategy {
    pub bb_period: usize,
    pub bb_sigma: f64,
    pub adx_max: f64,
    pub bb_width_max: f64,
    pub zscore_entry: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stop_pct: f64,
    pub base_weight: f64,
}

impl Default for BollingerRangeStrategy {
    fn default() -> Self {
        Self {
            bb_period: 20,
            bb_sigma: 2.0,
            adx_max: 18.0,
            bb_width_max: 0.04,
            zscore_entry: 2.0,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            stop_pct: 0.02,
            base_weight: 0.5,
        }
    }
}

impl Strategy for BollingerRangeStrategy {
    fn id(&self) -> &'static str {
        "bollinger_range"
    }

    fn required_regimes(&self) -> &[Regime] {
        &[Regime::Range]
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);
        if snapshot.len() < 40 {
            return StrategySignal::flat(self.id(), ts, "insufficient data");
        }

        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let i = closes.len() - 1;

        let bb = indicators::bollinger(&closes, self.bb_period, self.bb_sigma);
        let adx = indicators::adx(&highs, &lows, &closes, 14);
        let z = indicators::zscore(&closes, self.bb_period);
        let rsi = indicators::rsi(&closes, 14);

        let (Some(adx_v), Some(rsi_v), Some(mid_v)) =
            (last_valid(&adx), last_valid(&rsi), last_valid(&bb.middle))
        else {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        };
        let width = bb.width[i];
        let z_v = z[i];
        if width.is_nan() || z_v.is_nan() {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        }

        let quiet = adx_v < self.adx_max && width < self.bb_width_max;
        if !quiet {
            return StrategySignal::flat(self.id(), ts, "range conditions absent");
        }

        let close = closes[i];
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default();

        if z_v <= -self.zscore_entry && rsi_v < self.rsi_oversold {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Long,
                confidence: 0.6 + (-z_v - self.zscore_entry) * 0.05,
                target_weight: self.base_weight,
                stop: Some(dec(close * (1.0 - self.stop_pct))),
                take_profit: Some(dec(mid_v)),
                reason: format!("band fade long: z {:.2}, RSI {:.1}, ADX {:.1}", z_v, rsi_v, adx_v),
            };
        }
        if z_v >= self.zscore_entry && rsi_v > self.rsi_overbought {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Short,
                confidence: 0.6 + (z_v - self.zscore_entry) * 0.05,
                target_weight: -self.base_weight,
                stop: Some(dec(close * (1.0 + self.stop_pct))),
                take_profit: Some(dec(mid_v)),
                reason: format!("band fade short: z {:.2}, RSI {:.1}, ADX {:.1}", z_v, rsi_v, adx_v),
            };
        }

        // Normalized: any open fade should come off at the midline.
        if z_v >= 0.0 && z_v < 0.5 {
            let mut signal = StrategySignal::flat(self.id(), ts, "z normalized");
            signal.intent = SignalIntent::CloseLong;
            return signal;
        }

        StrategySignal::flat(self.id(), ts, "inside bands")
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{candle, flat_tape, snapshot};
    use super::*;

    #[test]
    fn test_oversold_stretch_goes_long() {
        let mut candles = flat_tape(60, 100.0);
        // Sharp 3-bar flush below the band.
        let n = candles.len();
        candles[n - 3] = candle(n - 3, 99.9, 99.9, 98.9, 99.0, 120.0);
        candles[n - 2] = candle(n - 2, 99.0, 99.0, 98.2, 98.4, 130.0);
        candles[n - 1] = candle(n - 1, 98.4, 98.4, 97.6, 97.8, 140.0);

        let signal = BollingerRangeStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.intent, SignalIntent::Long);
        assert!(signal.target_weight > 0.0);
        assert!(signal.stop.is_some() && signal.take_profit.is_some());
    }

    #[test]
    fn test_trending_tape_stays_flat() {
        // Strong trend: ADX disqualifies the fade even at a band touch.
        let candles: Vec<_> = (0..80)
            .map(|i| {
                let p = 100.0 + i as f64 * 1.5;
                candle(i, p, p + 1.0, p - 1.0, p + 0.8, 100.0)
            })
            .collect();
        let signal = BollingerRangeStrategy::default().signal(&snapshot(candles));
        assert_eq!(signal.target_weight, 0.0);
        assert!(signal.intent == SignalIntent::Flat || signal.intent == SignalIntent::CloseLong);
    }

    #[test]
    fn test_trend_snapshot_no_division_by_zero() {
        // A TREND-shaped snapshot must produce FLAT cleanly (regime gating
        // happens upstream, but the strategy itself must not blow up).
        let candles: Vec<_> = (0..80)
            .map(|i| {
                let p = 100.0 * 1.02f64.powi(i as i32);
                candle(i, p, p * 1.01, p * 0.99, p * 1.005, 100.0)
            })
            .collect();
        let signal = BollingerRangeStrategy::default().signal(&snapshot(candles));
        assert!(signal.confidence.is_finite());
        assert!(signal.target_weight.is_finite());
    }
}
