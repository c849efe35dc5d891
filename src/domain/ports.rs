//! Port interfaces: the domain boundary infrastructure adapters implement.

use crate::domain::context::ReviewedSymbolRecord;
use crate::domain::errors::ExchangeError;
use crate::domain::types::{Candle, ClosedTrade, OrderSide, OrderType, Ticker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginType {
    Isolated,
    Crossed,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: crate::domain::types::PositionSide,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub close_position: bool,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct PositionRow {
    pub symbol: String,
    pub position_amount: Decimal,
    pub entry_price: Decimal,
}

/// C3 — the signed exchange REST adapter (`spec.md` §4.3, §6).
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Contracts with `status=TRADING` and `contractType=PERPETUAL` ending
    /// in `USDT`.
    async fn list_perpetual_symbols(&self) -> Result<Vec<String>, ExchangeError>;

    /// Intersected with the perpetual set.
    async fn get_all_tickers_24h(&self) -> Result<Vec<Ticker>, ExchangeError>;

    /// Paginated with `limit ≤ 1000` per call; returns ascending order.
    async fn get_klines(
        &self,
        symbol: &str,
        tf: crate::domain::time::Timeframe,
        limit: usize,
        include_open: bool,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// USDT available balance.
    async fn get_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Defaults to the last 24h when no range given; newest-first; on any
    /// failure returns an empty list (treated as "no history").
    async fn get_closed_trades(
        &self,
        symbol: Option<&str>,
        limit: usize,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<ClosedTrade>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError>;

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// Rows with absolute position amount greater than a small epsilon.
    async fn get_position(&self, symbol: Option<&str>) -> Result<Vec<PositionRow>, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;
}

/// C6's LLM capability port: `chat(messages, temperature, maxTokens) -> String`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, crate::domain::errors::AdvisorError>;
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

/// C5's persisted rolling-context store.
#[async_trait]
pub trait ContextStorePort: Send + Sync {
    async fn load_review_knowledge(&self) -> Vec<crate::domain::context::ReviewEntry>;
    async fn add_review(&self, entry: crate::domain::context::ReviewEntry);

    async fn load_optimized_strategies(&self) -> Vec<crate::domain::context::OptimizedStrategy>;
    async fn add_strategy(&self, entry: crate::domain::context::OptimizedStrategy);

    async fn load_learning_results(&self) -> Vec<crate::domain::context::LearningEntry>;
    async fn add_learning(&self, entry: crate::domain::context::LearningEntry);

    async fn reviewed_symbols_today(&self) -> HashMap<String, ReviewedSymbolRecord>;
    async fn mark_reviewed(&self, symbol: String, record: ReviewedSymbolRecord);

    async fn clear_all(&self);
}
