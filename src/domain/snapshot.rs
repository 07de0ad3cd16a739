use crate::domain::timeframe::Timeframe;
use crate::domain::types::{Candle, FundingRate, PriceSnapshot};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Immutable point-in-time view handed to strategies and the regime
/// classifier. Built only by the data service; strategies never reach past it
/// to the store or the venue.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Closed bars, ascending by ts. The currently forming bar is never here.
    pub candles: Vec<Candle>,
    /// Recent funding rows, newest first.
    pub funding: Vec<FundingRate>,
    pub prices: Option<PriceSnapshot>,
    /// When the snapshot was assembled, epoch ms.
    pub as_of: i64,
}

impl MarketSnapshot {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.high.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.low.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles
            .iter()
            .map(|c| c.volume.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.candles.last().map(|c| c.close)
    }

    pub fn latest_funding(&self) -> Option<&FundingRate> {
        self.funding.first()
    }

    /// Stale when the newest closed bar is older than `max_bars` bar
    /// intervals behind `as_of`. A stale snapshot degrades the decision
    /// cycle to HOLD.
    pub fn is_stale(&self, max_bars: i64) -> bool {
        match self.candles.last() {
            Some(last) => {
                let age = self.as_of - (last.ts + self.timeframe.duration_ms());
                age > max_bars * self.timeframe.duration_ms()
            }
            None => true,
        }
    }
}
