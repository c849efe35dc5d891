//! Raw wire-format structs for Binance USDⓈ-M futures REST responses.
//! Parsing here is the only place that knows about Binance's exact field
//! names; everything above this module speaks domain types.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "contractType")]
    pub contract_type: String,
}

#[derive(Debug, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "priceChangePercent")]
    pub price_change_percent: String,
    pub volume: String,
    #[serde(rename = "quoteVolume")]
    pub quote_volume: String,
    #[serde(rename = "highPrice")]
    pub high_price: String,
    #[serde(rename = "lowPrice")]
    pub low_price: String,
    #[serde(rename = "openPrice")]
    pub open_price: String,
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub assets: Vec<AccountAsset>,
}

#[derive(Debug, Deserialize)]
pub struct AccountAsset {
    pub asset: String,
    #[serde(rename = "availableBalance")]
    pub available_balance: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionRiskRow {
    pub symbol: String,
    #[serde(rename = "positionAmt")]
    pub position_amt: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountTrade {
    pub symbol: String,
    pub id: i64,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub side: String,
    pub price: String,
    pub qty: String,
    #[serde(rename = "realizedPnl")]
    pub realized_pnl: String,
    pub time: i64,
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub symbol: String,
}

/// A kline row is a heterogeneous JSON array:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_kline_row(row: &serde_json::Value) -> Option<(i64, String, String, String, String, String, i64)> {
    let arr = row.as_array()?;
    Some((
        arr.first()?.as_i64()?,
        arr.get(1)?.as_str()?.to_string(),
        arr.get(2)?.as_str()?.to_string(),
        arr.get(3)?.as_str()?.to_string(),
        arr.get(4)?.as_str()?.to_string(),
        arr.get(5)?.as_str()?.to_string(),
        arr.get(6)?.as_i64()?,
    ))
}
