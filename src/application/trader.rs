//! C8 — trader: single-position-per-symbol guard, protective order triple,
//! compensating close on SL failure (`spec.md` §4.8).

use crate::domain::errors::TradeError;
use crate::domain::ports::{ExchangePort, MarginType, PlaceOrderRequest, PlacedOrder};
use crate::domain::position::ActivePosition;
use crate::domain::types::{AnalysisResult, OrderSide, OrderType, PositionSide};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const STABLE_QUOTES: &[&str] = &["USDT", "USDC", "BUSD"];
const DEFAULT_LEVERAGE: u32 = 1;
const MARGIN_BUFFER: f64 = 0.95;
const SIZE_SCALE_DOWN_FACTOR: f64 = 0.99;

pub struct TradeResult {
    pub success: bool,
    pub message: String,
    pub entry_order_id: Option<String>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    pub compensating_close: bool,
}

pub struct Trader {
    exchange: Arc<dyn ExchangePort>,
    active_positions: Mutex<HashMap<String, ActivePosition>>,
    max_loss_per_trade: f64,
    max_position_size: f64,
}

impl Trader {
    pub fn new(exchange: Arc<dyn ExchangePort>, max_loss_per_trade: f64, max_position_size: f64) -> Self {
        Self {
            exchange,
            active_positions: Mutex::new(HashMap::new()),
            max_loss_per_trade,
            max_position_size,
        }
    }

    async fn has_open_position(&self, symbol: &str) -> Result<bool, TradeError> {
        if self.active_positions.lock().await.contains_key(symbol) {
            return Ok(true);
        }
        let rows = self
            .exchange
            .get_position(Some(symbol))
            .await
            .map_err(|e| TradeError::Validation(format!("failed to check exchange position: {e}")))?;
        Ok(!rows.is_empty())
    }

    pub async fn execute_trade(&self, analysis: &AnalysisResult, balance: f64) -> TradeResult {
        if let Err(e) = validate_symbol(&analysis.symbol) {
            return rejected(e);
        }

        let Some(side) = analysis.action.position_side() else {
            return rejected(TradeError::Validation("action is 观望, nothing to execute".to_string()));
        };

        match self.has_open_position(&analysis.symbol).await {
            Ok(true) => return rejected(TradeError::DuplicateOpen { symbol: analysis.symbol.clone() }),
            Err(e) => return rejected(e),
            Ok(false) => {}
        }

        let (Some(stop_loss), Some(take_profit)) = (analysis.stop_loss, analysis.take_profit) else {
            return rejected(TradeError::Validation("missing stop-loss/take-profit after risk override".to_string()));
        };
        if !price_ordering_valid(analysis.entry, stop_loss, take_profit, side) {
            return rejected(TradeError::Validation("price ordering invariant violated".to_string()));
        }
        if !(analysis.entry > 0.0 && stop_loss > 0.0 && take_profit > 0.0) {
            return rejected(TradeError::Validation("prices must be finite and positive".to_string()));
        }

        let leverage = match analysis.leverage {
            Some(lev) if (1..=125).contains(&lev) => lev,
            _ => DEFAULT_LEVERAGE,
        };

        let mut quantity = analysis.position_size.unwrap_or(0.0);
        if quantity <= 0.0 {
            return rejected(TradeError::Validation("computed position size is zero".to_string()));
        }

        let margin_required = quantity * analysis.entry / leverage as f64;
        if margin_required > balance * MARGIN_BUFFER {
            return rejected(TradeError::Validation("required margin exceeds 95% of balance".to_string()));
        }

        let potential_loss = quantity * (analysis.entry - stop_loss).abs();
        if potential_loss > self.max_loss_per_trade * balance {
            quantity *= SIZE_SCALE_DOWN_FACTOR;
        }
        let notional = quantity * analysis.entry;
        if notional > self.max_position_size * balance {
            quantity *= SIZE_SCALE_DOWN_FACTOR;
        }

        // Double-check immediately before sending the entry order.
        match self.has_open_position(&analysis.symbol).await {
            Ok(true) => return rejected(TradeError::DuplicateOpen { symbol: analysis.symbol.clone() }),
            Err(e) => return rejected(e),
            Ok(false) => {}
        }

        self.run_protective_triple(analysis, side, leverage, quantity, stop_loss, take_profit).await
    }

    async fn run_protective_triple(
        &self,
        analysis: &AnalysisResult,
        side: PositionSide,
        leverage: u32,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> TradeResult {
        let symbol = &analysis.symbol;

        if let Err(e) = self.exchange.set_leverage(symbol, leverage).await {
            warn!("set_leverage failed for {}: {}", symbol, e);
        }
        if let Err(e) = self.exchange.set_margin_type(symbol, MarginType::Isolated).await {
            warn!("set_margin_type failed for {}: {}", symbol, e);
        }

        info!(
            "executing trade {} side={:?} entry={} sl={} tp={} qty={} lev={} margin≈{:.2}",
            symbol, side, analysis.entry, stop_loss, take_profit, quantity, leverage,
            quantity * analysis.entry / leverage as f64
        );

        let entry_side = match side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        };
        let close_side = entry_side.opposite();

        let quantity_dec = Decimal::from_f64(quantity).unwrap_or(Decimal::ZERO);

        let entry_order = match self
            .exchange
            .place_order(PlaceOrderRequest {
                symbol: symbol.clone(),
                side: entry_side,
                position_side: side,
                order_type: OrderType::Market,
                quantity: Some(quantity_dec),
                close_position: false,
                price: None,
                stop_price: None,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => return rejected(TradeError::Validation(format!("entry order failed: {e}"))),
        };

        let stop_price = Decimal::from_f64(stop_loss).unwrap_or(Decimal::ZERO);
        let sl_order = self
            .exchange
            .place_order(PlaceOrderRequest {
                symbol: symbol.clone(),
                side: close_side,
                position_side: side,
                order_type: OrderType::StopMarket,
                quantity: None,
                close_position: true,
                price: None,
                stop_price: Some(stop_price),
            })
            .await;

        let sl_order = match sl_order {
            Ok(order) => order,
            Err(sl_error) => {
                error!("stop-loss placement failed for {}, compensating close: {}", symbol, sl_error);
                let close_result = self
                    .exchange
                    .place_order(PlaceOrderRequest {
                        symbol: symbol.clone(),
                        side: close_side,
                        position_side: side,
                        order_type: OrderType::Market,
                        quantity: Some(quantity_dec),
                        close_position: true,
                        price: None,
                        stop_price: None,
                    })
                    .await;

                let (close_succeeded, close_error) = match close_result {
                    Ok(_) => (true, None),
                    Err(e) => (false, Some(e.to_string())),
                };

                let compensating = TradeError::CompensatingCloseFailed {
                    sl_error: sl_error.to_string(),
                    close_succeeded,
                    close_error,
                };
                return TradeResult {
                    success: false,
                    message: compensating.to_string(),
                    entry_order_id: Some(entry_order.order_id),
                    stop_loss_order_id: None,
                    take_profit_order_id: None,
                    compensating_close: true,
                };
            }
        };

        let tp_price = Decimal::from_f64(take_profit).unwrap_or(Decimal::ZERO);
        let tp_order: Option<PlacedOrder> = match self
            .exchange
            .place_order(PlaceOrderRequest {
                symbol: symbol.clone(),
                side: close_side,
                position_side: side,
                order_type: OrderType::TakeProfitMarket,
                quantity: None,
                close_position: true,
                price: None,
                stop_price: Some(tp_price),
            })
            .await
        {
            Ok(order) => Some(order),
            Err(e) => {
                warn!("take-profit placement failed for {} (tolerated, SL still protects): {}", symbol, e);
                None
            }
        };

        let mut positions = self.active_positions.lock().await;
        positions.insert(
            symbol.clone(),
            ActivePosition {
                symbol: symbol.clone(),
                side,
                entry_order_id: entry_order.order_id.clone(),
                stop_loss_order_id: Some(sl_order.order_id.clone()),
                take_profit_order_id: tp_order.as_ref().map(|o| o.order_id.clone()),
                quantity: quantity_dec,
                entry_time: chrono::Utc::now(),
            },
        );
        drop(positions);

        let message = if tp_order.is_some() {
            "trade executed with full protective triple".to_string()
        } else {
            "trade executed; take-profit order failed, stop-loss still active".to_string()
        };

        TradeResult {
            success: true,
            message,
            entry_order_id: Some(entry_order.order_id),
            stop_loss_order_id: Some(sl_order.order_id),
            take_profit_order_id: tp_order.map(|o| o.order_id),
            compensating_close: false,
        }
    }

    /// Issues a market close for the tracked position, cancels tracked SL/TP
    /// order IDs individually, falls back to `cancelAllOrders` if IDs are
    /// missing, then evicts the symbol from the active cache.
    pub async fn close_position(&self, symbol: &str) -> Result<(), TradeError> {
        let position = {
            let mut positions = self.active_positions.lock().await;
            positions.remove(symbol)
        };

        let Some(position) = position else {
            return Err(TradeError::Validation(format!("no tracked position for {symbol}")));
        };

        let close_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };

        if let Err(e) = self
            .exchange
            .place_order(PlaceOrderRequest {
                symbol: symbol.to_string(),
                side: close_side,
                position_side: position.side,
                order_type: OrderType::Market,
                quantity: Some(position.quantity),
                close_position: true,
                price: None,
                stop_price: None,
            })
            .await
        {
            warn!("close_position market close failed for {}: {}", symbol, e);
        }

        let mut any_tracked = false;
        if let Some(id) = &position.stop_loss_order_id {
            any_tracked = true;
            let _ = self.exchange.cancel_order(symbol, id).await;
        }
        if let Some(id) = &position.take_profit_order_id {
            any_tracked = true;
            let _ = self.exchange.cancel_order(symbol, id).await;
        }
        if !any_tracked {
            let _ = self.exchange.cancel_all_orders(symbol).await;
        }

        Ok(())
    }

    pub async fn active_position(&self, symbol: &str) -> Option<ActivePosition> {
        self.active_positions.lock().await.get(symbol).cloned()
    }
}

fn validate_symbol(symbol: &str) -> Result<(), TradeError> {
    if symbol.is_empty() {
        return Err(TradeError::Validation("symbol is empty".to_string()));
    }
    if !STABLE_QUOTES.iter().any(|q| symbol.ends_with(q)) {
        return Err(TradeError::Validation(format!("{symbol} does not end in a recognized stable quote")));
    }
    Ok(())
}

fn price_ordering_valid(entry: f64, stop: f64, take_profit: f64, side: PositionSide) -> bool {
    match side {
        PositionSide::Long => stop < entry && entry < take_profit,
        PositionSide::Short => take_profit < entry && entry < stop,
    }
}

fn rejected(error: TradeError) -> TradeResult {
    TradeResult {
        success: false,
        message: error.to_string(),
        entry_order_id: None,
        stop_loss_order_id: None,
        take_profit_order_id: None,
        compensating_close: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExchangeError;
    use crate::domain::ports::PositionRow;
    use crate::domain::time::Timeframe;
    use crate::domain::types::{Action, Candle, ClosedTrade, Ticker};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockExchange {
        positions: Mutex<HashMap<String, Vec<PositionRow>>>,
        fail_stop_loss: bool,
        order_counter: AtomicUsize,
    }

    impl MockExchange {
        fn new(fail_stop_loss: bool) -> Self {
            Self { positions: Mutex::new(HashMap::new()), fail_stop_loss, order_counter: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ExchangePort for MockExchange {
        async fn list_perpetual_symbols(&self) -> Result<Vec<String>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_all_tickers_24h(&self) -> Result<Vec<Ticker>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_klines(&self, _s: &str, _tf: Timeframe, _l: usize, _io: bool) -> Result<Vec<Candle>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
            Ok(Decimal::ZERO)
        }
        async fn get_closed_trades(&self, _s: Option<&str>, _l: usize, _r: Option<(DateTime<Utc>, DateTime<Utc>)>) -> Vec<ClosedTrade> {
            vec![]
        }
        async fn set_leverage(&self, _s: &str, _l: u32) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn set_margin_type(&self, _s: &str, _m: MarginType) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, ExchangeError> {
            if self.fail_stop_loss && req.order_type == OrderType::StopMarket {
                return Err(ExchangeError::Transient("simulated SL failure".to_string()));
            }
            let id = self.order_counter.fetch_add(1, Ordering::SeqCst);
            Ok(PlacedOrder { order_id: format!("ord-{id}"), symbol: req.symbol })
        }
        async fn get_position(&self, symbol: Option<&str>) -> Result<Vec<PositionRow>, ExchangeError> {
            let positions = self.positions.lock().await;
            Ok(symbol.and_then(|s| positions.get(s)).cloned().unwrap_or_default())
        }
        async fn cancel_order(&self, _s: &str, _o: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _s: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    fn sample_analysis() -> AnalysisResult {
        AnalysisResult {
            symbol: "BTCUSDT".to_string(),
            trend: "uptrend".to_string(),
            action: Action::Long,
            confidence: 0.8,
            entry: 50000.0,
            stop_loss: Some(49800.0),
            take_profit: Some(50400.0),
            support: None,
            resistance: None,
            risk_reward: Some(2.0),
            reason: "test".to_string(),
            warnings: vec![],
            trading_standard: None,
            leverage: Some(5),
            position_size: Some(0.5),
            margin_required: Some(5000.0),
            potential_profit: Some(200.0),
            potential_loss: Some(100.0),
            provider: "test".to_string(),
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn scenario_single_buy_triple_succeeds() {
        let trader = Trader::new(Arc::new(MockExchange::new(false)), 0.02, 0.3);
        let result = trader.execute_trade(&sample_analysis(), 10000.0).await;
        assert!(result.success);
        assert!(result.entry_order_id.is_some());
        assert!(result.stop_loss_order_id.is_some());
        assert!(result.take_profit_order_id.is_some());
    }

    #[tokio::test]
    async fn duplicate_open_is_rejected() {
        let trader = Trader::new(Arc::new(MockExchange::new(false)), 0.02, 0.3);
        let first = trader.execute_trade(&sample_analysis(), 10000.0).await;
        assert!(first.success);

        let second = trader.execute_trade(&sample_analysis(), 10000.0).await;
        assert!(!second.success);
        assert!(second.message.to_lowercase().contains("position") || second.message.contains("has"));
    }

    #[tokio::test]
    async fn stop_loss_failure_triggers_compensating_close() {
        let trader = Trader::new(Arc::new(MockExchange::new(true)), 0.02, 0.3);
        let result = trader.execute_trade(&sample_analysis(), 10000.0).await;
        assert!(!result.success);
        assert!(result.compensating_close);
        assert!(trader.active_position("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn rejects_action_observe() {
        let trader = Trader::new(Arc::new(MockExchange::new(false)), 0.02, 0.3);
        let mut analysis = sample_analysis();
        analysis.action = Action::Wait;
        let result = trader.execute_trade(&analysis, 10000.0).await;
        assert!(!result.success);
    }
}
