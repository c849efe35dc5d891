//! Core trading data types (`spec.md` §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable OHLCV aggregate, ordered ascending by `open_time_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_closed: bool,
}

/// 24h ticker snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub open: Decimal,
    pub trades: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that closes a position opened with `self`.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_binance_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// `action ∈ {做多, 做空, 观望}` — preserved verbatim, never translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "做多")]
    Long,
    #[serde(rename = "做空")]
    Short,
    #[serde(rename = "观望")]
    Wait,
}

impl Action {
    pub fn as_chinese(self) -> &'static str {
        match self {
            Action::Long => "做多",
            Action::Short => "做空",
            Action::Wait => "观望",
        }
    }

    pub fn position_side(self) -> Option<PositionSide> {
        match self {
            Action::Long => Some(PositionSide::Long),
            Action::Short => Some(PositionSide::Short),
            Action::Wait => None,
        }
    }
}

/// `{symbol, trend, action, confidence, entry, stopLoss, takeProfit, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub trend: String,
    pub action: Action,
    pub confidence: f64,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub risk_reward: Option<f64>,
    pub reason: String,
    pub warnings: Vec<String>,
    pub trading_standard: Option<String>,
    pub leverage: Option<u32>,
    pub position_size: Option<f64>,
    pub margin_required: Option<f64>,
    pub potential_profit: Option<f64>,
    pub potential_loss: Option<f64>,
    pub provider: String,
    pub analyzed_at: DateTime<Utc>,
}

/// A single completed order-fill pair reconstructed from exchange trade rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: OrderSide,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn duration(&self) -> chrono::Duration {
        self.closed_at - self.opened_at
    }
}
