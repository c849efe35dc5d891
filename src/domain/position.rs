//! Active-position cache entry (`spec.md` §3 "Active-position cache").
//!
//! This cache is authoritative for *blocking duplicate opens*; the exchange
//! is authoritative for *confirming existing positions*. Both must agree to
//! open; either one is sufficient to block (`spec.md` §3 invariants, §8).

use crate::domain::types::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct ActivePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_order_id: String,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
}
