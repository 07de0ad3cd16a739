use super::{last_valid, signal_ts, Strategy};
use crate::domain::indicators;
use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::{SignalIntent, StrategySignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Squeeze breakout. A low-quantile Bollinger width, a close clearing the
/// lookback resistance with margin, a volume surge and a strong body candle
/// make the entry; two consecutive closes back below the level fail it.
#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    pub lookback: usize,
    pub squeeze_quantile: f64,
    pub level_margin: f64,
    pub volume_mult: f64,
    pub min_body_ratio: f64,
    pub stop_atr: f64,
    pub base_weight: f64,
}

impl Default for BreakoutStrategy {
    fn default() -> Self {
        Self {
            lookback: 20,
            squeeze_quantile: 0.25,
            level_margin: 1.005,
            volume_mult: 1.5,
            min_body_ratio: 0.6,
            stop_atr: 1.5,
            base_weight: 0.9,
        }
    }
}

impl Strategy for BreakoutStrategy {
    fn id(&self) -> &'static str {
        "breakout"
    }

    fn required_regimes(&self) -> &[Regime] {
        &[Regime::Breakout]
    }

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal {
        let ts = signal_ts(snapshot);
        if snapshot.len() < self.lookback * 3 {
            return StrategySignal::flat(self.id(), ts, "insufficient data");
        }

        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let opens: Vec<f64> = snapshot
            .candles
            .iter()
            .map(|c| rust_decimal::prelude::ToPrimitive::to_f64(&c.open).unwrap_or(f64::NAN))
            .collect();
        let volumes = snapshot.volumes();
        let i = closes.len() - 1;

        let bb = indicators::bollinger(&closes, 20, 2.0);
        let width_rank = indicators::percentile_rank(&bb.width, self.lookback * 2);
        let atr = indicators::atr(&highs, &lows, &closes, 14);
        let vol_sma = indicators::sma(&volumes, self.lookback);

        let (Some(atr_v), Some(vol_sma_v)) = (last_valid(&atr), last_valid(&vol_sma)) else {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        };
        // Squeeze measured one bar back so the expansion bar itself does not
        // disqualify the entry.
        let squeeze = width_rank[i - 1];
        if squeeze.is_nan() {
            return StrategySignal::flat(self.id(), ts, "indicator warmup");
        }

        // Resistance and support over the lookback, excluding the signal bar.
        let window_hi = &highs[i - self.lookback..i];
        let window_lo = &lows[i - self.lookback..i];
        let resistance = window_hi.iter().cloned().fold(f64::MIN, f64::max);
        let support = window_lo.iter().cloned().fold(f64::MAX, f64::min);

        let close = closes[i];
        let range = highs[i] - lows[i];
        let body = (close - opens[i]).abs();
        let strong_candle = range > 0.0 && body / range >= self.min_body_ratio;
        let volume_surge = volumes[i] > vol_sma_v * self.volume_mult;
        let squeezed = squeeze <= self.squeeze_quantile;
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default();

        if squeezed && close > resistance * self.level_margin && volume_surge && strong_candle {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Long,
                confidence: 0.75,
                target_weight: self.base_weight,
                stop: Some(dec(close - self.stop_atr * atr_v)),
                take_profit: None,
                reason: format!(
                    "breakout above {:.2} on squeeze rank {:.2} with volume",
                    resistance, squeeze
                ),
            };
        }

        if squeezed && close < support * (2.0 - self.level_margin) && volume_surge && strong_candle
        {
            return StrategySignal {
                strategy_id: self.id().to_string(),
                ts,
                intent: SignalIntent::Short,
                confidence: 0.75,
                target_weight: -self.base_weight,
                stop: Some(dec(close + self.stop_atr * atr_v)),
                take_profit: None,
                reason: format!(
                    "breakdown below {:.2} on squeeze rank {:.2} with volume",
                    support, squeeze
                ),
            };
        }

        // Fail-exit: a recent breakout level giving way again. Two closes back
        // under the prior resistance kill the long.
        if i >= 2 {
            let prior_resistance = highs[i.saturating_sub(self.lookback + 2)..i - 2]
                .iter()
                .cloned()
                .fold(f64::MIN, f64::max);
            if closes[i] < prior_resistance && closes[i - 1] < prior_resistance
                && highs[i - 2] > prior_resistance
            {
                let mut signal =
                    StrategySignal::flat(self.id(), ts, "two closes back below breakout level");
                signal.intent = SignalIntent::CloseLong;
                signal.confidence = 0.6;
                return signal;
            }
        }

        StrategySignal::flat(self.id(), ts, "no breakout")
    }
}
