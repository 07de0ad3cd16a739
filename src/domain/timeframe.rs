use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle timeframes supported by the trading core. Sub-15m bars are
/// deliberately not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    /// Bar duration in epoch milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.to_minutes() * 60_000
    }

    /// Bars per (365-day) year, used to annualize backtest metrics.
    pub fn bars_per_year(&self) -> f64 {
        (365.0 * 1440.0) / self.to_minutes() as f64
    }

    /// Converts to OKX API bar string.
    pub fn to_okx_bar(&self) -> &'static str {
        match self {
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1H",
            Timeframe::FourHour => "4H",
            Timeframe::OneDay => "1D",
        }
    }

    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }

    /// Checks if a timestamp lies exactly on this timeframe's bar grid.
    pub fn is_bar_start(&self, ts_ms: i64) -> bool {
        ts_ms % self.duration_ms() == 0
    }

    /// Rounds a timestamp down to the start of the bar containing it.
    /// Daily bars open at midnight UTC, which the modulo already honours
    /// because the epoch started at midnight.
    pub fn bar_start(&self, ts_ms: i64) -> i64 {
        ts_ms - (ts_ms % self.duration_ms())
    }

    /// Enumerates the expected bar timestamps in `[start_ts, end_ts]`,
    /// aligned to this timeframe's grid.
    pub fn bar_grid(&self, start_ts: i64, end_ts: i64) -> Vec<i64> {
        let step = self.duration_ms();
        let first = if self.is_bar_start(start_ts) {
            start_ts
        } else {
            self.bar_start(start_ts) + step
        };
        let mut out = Vec::new();
        let mut ts = first;
        while ts <= end_ts {
            out.push(ts);
            ts += step;
        }
        out
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" | "60m" => Ok(Timeframe::OneHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 15m, 1h, 4h, 1d",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_ms() {
        assert_eq!(Timeframe::FifteenMin.duration_ms(), 900_000);
        assert_eq!(Timeframe::OneHour.duration_ms(), 3_600_000);
        assert_eq!(Timeframe::OneDay.duration_ms(), 86_400_000);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("15m").unwrap(), Timeframe::FifteenMin);
        assert_eq!(Timeframe::from_str("1H").unwrap(), Timeframe::OneHour);
        assert_eq!(Timeframe::from_str("4h").unwrap(), Timeframe::FourHour);
        assert_eq!(Timeframe::from_str("1d").unwrap(), Timeframe::OneDay);
        assert!(Timeframe::from_str("1m").is_err());
        assert!(Timeframe::from_str("bogus").is_err());
    }

    #[test]
    fn test_bar_start_alignment() {
        let tf = Timeframe::FifteenMin;
        // 2024-01-01 00:00:00 UTC
        let base = 1_704_067_200_000i64;

        assert!(tf.is_bar_start(base));
        assert_eq!(tf.bar_start(base + 7 * 60_000), base);
        assert_eq!(
            tf.bar_start(base + 16 * 60_000),
            base + 15 * 60_000
        );
    }

    #[test]
    fn test_bar_grid() {
        let tf = Timeframe::OneHour;
        let base = 1_704_067_200_000i64;
        let grid = tf.bar_grid(base, base + 3 * 3_600_000);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[0], base);
        assert_eq!(grid[3], base + 3 * 3_600_000);

        // Unaligned start rounds up to the next bar.
        let grid = tf.bar_grid(base + 1, base + 3 * 3_600_000);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0], base + 3_600_000);
    }

    #[test]
    fn test_bars_per_year() {
        assert_eq!(Timeframe::OneDay.bars_per_year(), 365.0);
        assert_eq!(Timeframe::OneHour.bars_per_year(), 365.0 * 24.0);
    }
}
