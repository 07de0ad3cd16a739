mod fees;
mod slippage;
mod venue;

pub use fees::FeeSchedule;
pub use slippage::{FixedBpsSlippage, SizeImpactSlippage, SlippageModel, VolatilitySlippage, ZeroSlippage};
pub use venue::SimVenue;
