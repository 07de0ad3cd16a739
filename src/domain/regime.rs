use crate::domain::indicators;
use crate::domain::snapshot::MarketSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classified market state used to gate strategies. Exactly one label per
/// decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Trend,
    Range,
    Breakout,
    HighVol,
    Undefined,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Trend => "TREND",
            Regime::Range => "RANGE",
            Regime::Breakout => "BREAKOUT",
            Regime::HighVol => "HIGH_VOL",
            Regime::Undefined => "UNDEFINED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Regime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TREND" => Ok(Regime::Trend),
            "RANGE" => Ok(Regime::Range),
            "BREAKOUT" => Ok(Regime::Breakout),
            "HIGH_VOL" => Ok(Regime::HighVol),
            "UNDEFINED" => Ok(Regime::Undefined),
            _ => anyhow::bail!("Invalid regime: {}", s),
        }
    }
}

/// Classifier output: the label plus the raw tuple it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeReading {
    pub regime: Regime,
    pub adx: f64,
    pub bb_width: f64,
    pub atr_pct: f64,
}

impl RegimeReading {
    pub fn undefined() -> Self {
        Self {
            regime: Regime::Undefined,
            adx: f64::NAN,
            bb_width: f64::NAN,
            atr_pct: f64::NAN,
        }
    }
}

/// Thresholds are timeframe-parameterized; the config layer carries one set
/// per running timeframe.
#[derive(Debug, Clone)]
pub struct RegimeThresholds {
    /// ADX above this reads as trending.
    pub adx_trend: f64,
    /// ADX below this reads as directionless.
    pub adx_range: f64,
    pub bb_width_threshold: f64,
    /// BB width percentile below this counts as a squeeze.
    pub squeeze_quantile: f64,
    /// Volume over SMA(volume) multiple required to call a breakout.
    pub breakout_volume_mult: f64,
    /// EMA55 per-bar slope magnitude read as a strong trend.
    pub ema_slope_min: f64,
    /// ATR% above this kills directional strategies.
    pub vol_kill_threshold: f64,
    /// Bars of history used for breakout level and quantile checks.
    pub lookback: usize,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            adx_trend: 20.0,
            adx_range: 18.0,
            bb_width_threshold: 0.04,
            squeeze_quantile: 0.25,
            breakout_volume_mult: 1.5,
            ema_slope_min: 0.0008,
            vol_kill_threshold: 0.05,
            lookback: 50,
        }
    }
}

pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    /// Labels the snapshot. Ties resolve in the listed order:
    /// TREND, RANGE, BREAKOUT, HIGH_VOL, UNDEFINED.
    pub fn classify(&self, snapshot: &MarketSnapshot) -> RegimeReading {
        let t = &self.thresholds;
        let closes = snapshot.closes();
        let highs = snapshot.highs();
        let lows = snapshot.lows();
        let volumes = snapshot.volumes();
        let n = closes.len();

        // ADX needs 2 periods, EMA55 slope needs the longest warmup.
        if n < 60 {
            return RegimeReading::undefined();
        }
        let i = n - 1;

        let adx = indicators::adx(&highs, &lows, &closes, 14);
        let bb = indicators::bollinger(&closes, 20, 2.0);
        let atr_pct = indicators::atr_pct(&highs, &lows, &closes, 14);
        let ema55 = indicators::ema(&closes, 55);
        let ema_slope = indicators::slope(&ema55, 5);
        let width_rank = indicators::percentile_rank(&bb.width, t.lookback.min(n));
        let vol_sma = indicators::sma(&volumes, 20);

        let reading = |regime| RegimeReading {
            regime,
            adx: adx[i],
            bb_width: bb.width[i],
            atr_pct: atr_pct[i],
        };

        if adx[i].is_nan() || bb.width[i].is_nan() || atr_pct[i].is_nan() {
            return RegimeReading::undefined();
        }

        // TREND: directional strength with either expanding bands or a
        // persistent EMA55 slope.
        let width_rising = !bb.width[i - 1].is_nan() && bb.width[i] > bb.width[i - 1];
        let strong_slope = !ema_slope[i].is_nan() && ema_slope[i].abs() > t.ema_slope_min;
        if adx[i] > t.adx_trend && (width_rising || strong_slope) {
            return reading(Regime::Trend);
        }

        // RANGE: no direction and compressed bands.
        if adx[i] < t.adx_range && bb.width[i] < t.bb_width_threshold {
            return reading(Regime::Range);
        }

        // BREAKOUT: squeeze, close above the recent resistance, volume surge.
        let lb = t.lookback.min(n - 1);
        let resistance = highs[n - 1 - lb..n - 1]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let squeezed = !width_rank[i].is_nan() && width_rank[i] <= t.squeeze_quantile;
        let broke_level = closes[i] > resistance;
        let volume_surge = !vol_sma[i].is_nan() && volumes[i] > vol_sma[i] * t.breakout_volume_mult;
        if squeezed && broke_level && volume_surge {
            return reading(Regime::Breakout);
        }

        if atr_pct[i] > t.vol_kill_threshold {
            return reading(Regime::HighVol);
        }

        reading(Regime::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timeframe::Timeframe;
    use crate::domain::types::Candle;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn build_snapshot(bars: Vec<(f64, f64, f64, f64, f64)>) -> MarketSnapshot {
        let tf = Timeframe::OneHour;
        let base = 1_704_067_200_000i64;
        let candles = bars
            .into_iter()
            .enumerate()
            .map(|(i, (o, h, l, c, v))| Candle {
                symbol: "BTC-USDT-SWAP".to_string(),
                timeframe: tf,
                ts: base + i as i64 * tf.duration_ms(),
                open: Decimal::from_f64_retain(o).unwrap(),
                high: Decimal::from_f64_retain(h).unwrap(),
                low: Decimal::from_f64_retain(l).unwrap(),
                close: Decimal::from_f64_retain(c).unwrap(),
                volume: Decimal::from_f64_retain(v).unwrap(),
            })
            .collect::<Vec<_>>();
        let as_of = candles.last().map(|c| c.ts + tf.duration_ms()).unwrap_or(0);
        MarketSnapshot {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: tf,
            candles,
            funding: Vec::new(),
            prices: None,
            as_of,
        }
    }

    #[test]
    fn test_insufficient_data_is_undefined() {
        let bars = (0..30)
            .map(|i| {
                let p = 100.0 + i as f64;
                (p, p + 1.0, p - 1.0, p, 100.0)
            })
            .collect();
        let reading = RegimeClassifier::new(RegimeThresholds::default()).classify(&build_snapshot(bars));
        assert_eq!(reading.regime, Regime::Undefined);
    }

    #[test]
    fn test_steady_uptrend_reads_trend() {
        let bars = (0..120)
            .map(|i| {
                let p = 100.0 + i as f64 * 2.0;
                (p, p + 1.0, p - 1.0, p + 0.8, 100.0)
            })
            .collect();
        let reading = RegimeClassifier::new(RegimeThresholds::default()).classify(&build_snapshot(bars));
        assert_eq!(reading.regime, Regime::Trend);
        assert!(reading.adx > 20.0);
    }

    #[test]
    fn test_tight_oscillation_reads_range() {
        let bars = (0..120)
            .map(|i| {
                // +/-0.1% oscillation around 100.
                let p = 100.0 + 0.1 * ((i % 2) as f64 * 2.0 - 1.0);
                (p, p + 0.05, p - 0.05, p, 100.0)
            })
            .collect();
        let reading = RegimeClassifier::new(RegimeThresholds::default()).classify(&build_snapshot(bars));
        assert_eq!(reading.regime, Regime::Range);
    }

    #[test]
    fn test_vol_spike_reads_high_vol() {
        let mut thresholds = RegimeThresholds::default();
        // Make TREND/RANGE/BREAKOUT unreachable so the ATR% rule decides.
        thresholds.adx_trend = 101.0;
        thresholds.adx_range = -1.0;
        thresholds.breakout_volume_mult = 1e9;
        thresholds.vol_kill_threshold = 0.03;

        let bars = (0..120)
            .map(|i| {
                let p = 100.0 + (i % 7) as f64 * 3.0;
                // 8% bar ranges.
                (p, p + 4.0, p - 4.0, p + ((i % 3) as f64 - 1.0) * 2.0, 100.0)
            })
            .collect();
        let reading = RegimeClassifier::new(thresholds).classify(&build_snapshot(bars));
        assert_eq!(reading.regime, Regime::HighVol);
        assert!(reading.atr_pct > 0.03);
    }
}
