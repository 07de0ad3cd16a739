//! OKX v5 REST wire types. Only the fields the core reads are modeled; the
//! full payload travels on as `raw` where an audit trail needs it.

use crate::domain::types::OrderStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct OkxEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Candles arrive as positional string arrays:
/// [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm].
pub type OkxCandleRow = Vec<String>;

#[derive(Debug, Deserialize)]
pub struct OkxFundingRate {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "fundingRate")]
    pub funding_rate: String,
    #[serde(rename = "fundingTime")]
    pub funding_time: String,
    #[serde(rename = "nextFundingTime")]
    pub next_funding_time: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxTicker {
    #[serde(rename = "instId")]
    pub inst_id: String,
    pub last: String,
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxMarkPrice {
    #[serde(rename = "markPx")]
    pub mark_px: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxIndexTicker {
    #[serde(rename = "idxPx")]
    pub idx_px: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxBalanceDetail {
    pub ccy: String,
    #[serde(rename = "cashBal", default)]
    pub cash_bal: String,
    #[serde(rename = "availBal", default)]
    pub avail_bal: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxBalance {
    #[serde(rename = "totalEq", default)]
    pub total_eq: String,
    #[serde(default = "Vec::new")]
    pub details: Vec<OkxBalanceDetail>,
}

#[derive(Debug, Deserialize)]
pub struct OkxPosition {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "posSide", default)]
    pub pos_side: String,
    /// Signed contracts in net mode.
    #[serde(default)]
    pub pos: String,
    #[serde(rename = "avgPx", default)]
    pub avg_px: String,
    #[serde(default)]
    pub lever: String,
    #[serde(default)]
    pub upl: String,
    #[serde(default)]
    pub margin: String,
    #[serde(rename = "liqPx", default)]
    pub liq_px: String,
    #[serde(rename = "uTime", default)]
    pub u_time: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxOrderAck {
    #[serde(rename = "ordId", default)]
    pub ord_id: String,
    #[serde(rename = "clOrdId", default)]
    pub cl_ord_id: String,
    #[serde(rename = "sCode", default)]
    pub s_code: String,
    #[serde(rename = "sMsg", default)]
    pub s_msg: String,
}

#[derive(Debug, Deserialize)]
pub struct OkxOrderDetail {
    #[serde(rename = "ordId")]
    pub ord_id: String,
    #[serde(rename = "clOrdId", default)]
    pub cl_ord_id: String,
    #[serde(rename = "instId", default)]
    pub inst_id: String,
    /// live | partially_filled | filled | canceled | mmp_canceled
    pub state: String,
    #[serde(rename = "accFillSz", default)]
    pub acc_fill_sz: String,
    #[serde(rename = "avgPx", default)]
    pub avg_px: String,
    #[serde(default)]
    pub fee: String,
    #[serde(rename = "uTime", default)]
    pub u_time: String,
}

impl OkxOrderDetail {
    pub fn status(&self) -> OrderStatus {
        match self.state.as_str() {
            "live" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "canceled" | "mmp_canceled" => OrderStatus::Canceled,
            _ => OrderStatus::Accepted,
        }
    }
}
