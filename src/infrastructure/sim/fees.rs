use rust_decimal::Decimal;

/// Proportional fee schedule, quoted as rates (not bps). Market orders pay
/// taker; resting limit fills pay maker.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    pub fn new(maker_rate: Decimal, taker_rate: Decimal) -> Self {
        Self {
            maker_rate,
            taker_rate,
        }
    }

    /// Flat rate for both sides, as backtest CLI `--fee` configures it.
    pub fn flat(rate: Decimal) -> Self {
        Self {
            maker_rate: rate,
            taker_rate: rate,
        }
    }

    pub fn fee(&self, quantity: Decimal, price: Decimal, is_taker: bool) -> Decimal {
        let rate = if is_taker {
            self.taker_rate
        } else {
            self.maker_rate
        };
        quantity * price * rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_calculation() {
        let fees = FeeSchedule::new(dec!(0.0002), dec!(0.0005));
        assert_eq!(fees.fee(dec!(2), dec!(50000), true), dec!(50));
        assert_eq!(fees.fee(dec!(2), dec!(50000), false), dec!(20));

        let flat = FeeSchedule::flat(dec!(0.0005));
        assert_eq!(flat.fee(dec!(1), dec!(10000), false), dec!(5));
    }
}
