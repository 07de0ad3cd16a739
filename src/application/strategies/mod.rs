mod bollinger_range;
mod breakout;
mod ema_trend;
mod funding_arb;
mod grid;
mod mean_reversion;
mod momentum;

pub use bollinger_range::BollingerRangeStrategy;
pub use breakout::BreakoutStrategy;
pub use ema_trend::EmaTrendStrategy;
pub use funding_arb::FundingArbStrategy;
pub use grid::GridStrategy;
pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;

use crate::domain::regime::Regime;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::types::StrategySignal;
use std::collections::HashMap;
use std::sync::Arc;

/// A pure signal producer. Strategies read only the snapshot they are handed;
/// no exchange calls, no sleeping, no I/O.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &'static str;

    /// Regimes in which the portfolio scheduler will consider this strategy.
    fn required_regimes(&self) -> &[Regime];

    fn signal(&self, snapshot: &MarketSnapshot) -> StrategySignal;
}

pub const ALL_REGIMES: &[Regime] = &[
    Regime::Trend,
    Regime::Range,
    Regime::Breakout,
    Regime::HighVol,
    Regime::Undefined,
];

/// Runtime dispatch over the enabled strategy set, keyed by `strategy_id`.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// The canonical set with default parameters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmaTrendStrategy::default()));
        registry.register(Arc::new(BollingerRangeStrategy::default()));
        registry.register(Arc::new(FundingArbStrategy::default()));
        registry.register(Arc::new(BreakoutStrategy::default()));
        registry.register(Arc::new(MomentumStrategy::default()));
        registry.register(Arc::new(MeanReversionStrategy::default()));
        registry.register(Arc::new(GridStrategy::default()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies
            .insert(strategy.id().to_string(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.strategies.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn all(&self) -> Vec<Arc<dyn Strategy>> {
        let mut all: Vec<_> = self.strategies.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Runs every registered strategy against the snapshot. FLAT signals are
    /// included so the scheduler can see the full picture.
    pub fn signals(&self, snapshot: &MarketSnapshot) -> Vec<StrategySignal> {
        self.all().iter().map(|s| s.signal(snapshot)).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Decision timestamp for a snapshot: the close time of the newest bar.
pub(crate) fn signal_ts(snapshot: &MarketSnapshot) -> i64 {
    snapshot
        .candles
        .last()
        .map(|c| c.ts + snapshot.timeframe.duration_ms())
        .unwrap_or(snapshot.as_of)
}

/// Last value of an indicator series, None while still in warmup.
pub(crate) fn last_valid(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| !v.is_nan())
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::domain::snapshot::MarketSnapshot;
    use crate::domain::timeframe::Timeframe;
    use crate::domain::types::{Candle, FundingRate, PriceSnapshot};
    use rust_decimal::Decimal;

    pub const BASE_TS: i64 = 1_704_067_200_000;

    pub fn candle(i: usize, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
        let tf = Timeframe::OneHour;
        Candle {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: tf,
            ts: BASE_TS + i as i64 * tf.duration_ms(),
            open: Decimal::from_f64_retain(o).unwrap(),
            high: Decimal::from_f64_retain(h).unwrap(),
            low: Decimal::from_f64_retain(l).unwrap(),
            close: Decimal::from_f64_retain(c).unwrap(),
            volume: Decimal::from_f64_retain(v).unwrap(),
        }
    }

    pub fn snapshot(candles: Vec<Candle>) -> MarketSnapshot {
        let tf = Timeframe::OneHour;
        let as_of = candles
            .last()
            .map(|c| c.ts + tf.duration_ms())
            .unwrap_or(BASE_TS);
        MarketSnapshot {
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: tf,
            candles,
            funding: Vec::new(),
            prices: None,
            as_of,
        }
    }

    pub fn with_funding(mut snap: MarketSnapshot, rates: &[f64]) -> MarketSnapshot {
        // Newest first, 8h settlement spacing.
        snap.funding = rates
            .iter()
            .enumerate()
            .map(|(i, rate)| FundingRate {
                symbol: snap.symbol.clone(),
                ts: snap.as_of - (i as i64) * 28_800_000,
                rate: Decimal::from_f64_retain(*rate).unwrap(),
                next_funding_ts: snap.as_of + 28_800_000,
            })
            .collect();
        snap
    }

    pub fn with_prices(mut snap: MarketSnapshot, last: f64, mark: f64, index: f64) -> MarketSnapshot {
        snap.prices = Some(PriceSnapshot {
            symbol: snap.symbol.clone(),
            ts: snap.as_of,
            last: Decimal::from_f64_retain(last).unwrap(),
            mark: Decimal::from_f64_retain(mark).unwrap(),
            index: Decimal::from_f64_retain(index).unwrap(),
        });
        snap
    }

    /// Flat tape around `price` with mild noise so indicators warm up.
    pub fn flat_tape(bars: usize, price: f64) -> Vec<Candle> {
        (0..bars)
            .map(|i| {
                let wiggle = 0.1 * ((i % 2) as f64 * 2.0 - 1.0);
                let p = price + wiggle;
                candle(i, p, p + 0.2, p - 0.2, p, 100.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_canonical_set() {
        let registry = StrategyRegistry::with_defaults();
        for id in [
            "ema_trend",
            "bollinger_range",
            "funding_arb",
            "breakout",
            "momentum",
            "mean_reversion",
            "grid",
        ] {
            assert!(registry.contains(id), "missing strategy {}", id);
        }
        assert_eq!(registry.ids().len(), 7);
    }

    #[test]
    fn test_all_strategies_flat_on_empty_snapshot() {
        let registry = StrategyRegistry::with_defaults();
        let snapshot = testutil::snapshot(Vec::new());
        for signal in registry.signals(&snapshot) {
            assert!(signal.is_flat(), "{} not flat on empty data", signal.strategy_id);
        }
    }
}
