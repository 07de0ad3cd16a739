use crate::domain::types::Side;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::Mutex;

/// Slippage simulation model. Execution price is always adjusted against the
/// taker: buys fill higher, sells fill lower.
pub trait SlippageModel: Send + Sync {
    fn execution_price(&self, price: Decimal, quantity: Decimal, side: Side) -> Decimal;
}

/// Perfect execution.
pub struct ZeroSlippage;

impl SlippageModel for ZeroSlippage {
    fn execution_price(&self, price: Decimal, _quantity: Decimal, _side: Side) -> Decimal {
        price
    }
}

/// Constant cost in basis points.
pub struct FixedBpsSlippage {
    bps: f64,
}

impl FixedBpsSlippage {
    pub fn new(bps: f64) -> Self {
        Self { bps }
    }
}

impl SlippageModel for FixedBpsSlippage {
    fn execution_price(&self, price: Decimal, _quantity: Decimal, side: Side) -> Decimal {
        let pct = self.bps / 10_000.0;
        apply_pct(price, pct, side)
    }
}

/// Noise scaled by a volatility factor plus a fixed impact cost, seeded so
/// backtests replay identically.
pub struct VolatilitySlippage {
    volatility_factor: f64,
    rng: Mutex<StdRng>,
}

impl VolatilitySlippage {
    pub fn new(volatility_factor: f64, seed: u64) -> Self {
        Self {
            volatility_factor,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SlippageModel for VolatilitySlippage {
    fn execution_price(&self, price: Decimal, _quantity: Decimal, side: Side) -> Decimal {
        let noise = {
            let mut rng = self.rng.lock().expect("slippage rng poisoned");
            rng.random_range(-self.volatility_factor..=self.volatility_factor)
        };
        let impact = self.volatility_factor * 0.2;
        apply_pct(price, impact + noise, side)
    }
}

/// Quantity-dependent impact: cost grows linearly with order size relative to
/// a reference size.
pub struct SizeImpactSlippage {
    base_bps: f64,
    impact_bps_per_unit: f64,
}

impl SizeImpactSlippage {
    pub fn new(base_bps: f64, impact_bps_per_unit: f64) -> Self {
        Self {
            base_bps,
            impact_bps_per_unit,
        }
    }
}

impl SlippageModel for SizeImpactSlippage {
    fn execution_price(&self, price: Decimal, quantity: Decimal, side: Side) -> Decimal {
        let qty = quantity.to_f64().unwrap_or(0.0);
        let pct = (self.base_bps + self.impact_bps_per_unit * qty) / 10_000.0;
        apply_pct(price, pct, side)
    }
}

fn apply_pct(price: Decimal, pct: f64, side: Side) -> Decimal {
    let signed = match side {
        Side::Buy => pct,
        Side::Sell => -pct,
    };
    let adjusted = price.to_f64().unwrap_or(0.0) * (1.0 + signed);
    Decimal::from_f64(adjusted.max(0.0)).unwrap_or(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_slippage() {
        let model = ZeroSlippage;
        assert_eq!(
            model.execution_price(dec!(100), dec!(1), Side::Buy),
            dec!(100)
        );
    }

    #[test]
    fn test_fixed_bps_direction() {
        let model = FixedBpsSlippage::new(10.0); // 10 bps
        let buy = model.execution_price(dec!(100), dec!(1), Side::Buy);
        let sell = model.execution_price(dec!(100), dec!(1), Side::Sell);
        assert!(buy > dec!(100));
        assert!(sell < dec!(100));
        assert_eq!(buy, dec!(100.1));
        assert_eq!(sell, dec!(99.9));
    }

    #[test]
    fn test_volatility_slippage_is_deterministic_per_seed() {
        let a = VolatilitySlippage::new(0.001, 42);
        let b = VolatilitySlippage::new(0.001, 42);
        for _ in 0..10 {
            assert_eq!(
                a.execution_price(dec!(50000), dec!(1), Side::Buy),
                b.execution_price(dec!(50000), dec!(1), Side::Buy)
            );
        }
    }

    #[test]
    fn test_size_impact_grows_with_quantity() {
        let model = SizeImpactSlippage::new(1.0, 5.0);
        let small = model.execution_price(dec!(100), dec!(1), Side::Buy);
        let large = model.execution_price(dec!(100), dec!(10), Side::Buy);
        assert!(large > small);
    }
}
