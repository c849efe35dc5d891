//! Binance USDⓈ-M futures adapter (C3, `spec.md` §4.3, §6).

use super::signing::sign;
use super::wire::{self, AccountInfo, AccountTrade, ExchangeInfo, OrderResponse, PositionRiskRow, ServerTime, Ticker24h};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::{ExchangePort, MarginType, PlaceOrderRequest, PlacedOrder, PositionRow};
use crate::domain::time::Timeframe;
use crate::domain::types::{Candle, ClosedTrade, OrderSide, Ticker};
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::http_client::{build_canonical_query, format_decimal, HttpClientFactory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

const MAX_KLINE_PAGE: usize = 1000;
const SIGNATURE_RECV_WINDOW_MS: i64 = 5000;

pub struct BinanceAdapter {
    base_url: String,
    api_key: String,
    api_secret: String,
    client: ClientWithMiddleware,
    server_time_offset_ms: AtomicI64,
    circuit_breaker: CircuitBreaker,
}

impl BinanceAdapter {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            base_url,
            api_key,
            api_secret,
            client: HttpClientFactory::create_client(Duration::from_secs(10)),
            server_time_offset_ms: AtomicI64::new(0),
            circuit_breaker: CircuitBreaker::new(
                "binance",
                5,
                2,
                Duration::from_secs(30),
            ),
        }
    }

    /// Calls `/time` to compute `serverTimeOffset = serverTimeMs - localTimeMs`.
    /// Time-sync failure is non-fatal and yields an offset of 0 (`spec.md` §5).
    pub async fn sync_time(&self) {
        let local_before = now_ms();
        let url = format!("{}/fapi/v1/time", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<ServerTime>().await {
                Ok(server_time) => {
                    let offset = server_time.server_time - local_before;
                    self.server_time_offset_ms.store(offset, Ordering::SeqCst);
                    debug!("server time offset: {}ms", offset);
                }
                Err(e) => warn!("time sync: failed to parse response: {}", e),
            },
            Err(e) => warn!("time sync failed, using offset=0: {}", e),
        }
    }

    fn timestamp(&self) -> i64 {
        now_ms() + self.server_time_offset_ms.load(Ordering::SeqCst)
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<serde_json::Value, ExchangeError> {
        params.push(("timestamp".to_string(), self.timestamp().to_string()));
        params.push(("recvWindow".to_string(), SIGNATURE_RECV_WINDOW_MS.to_string()));

        let canonical_query = build_canonical_query(&params);
        let signature = sign(&self.api_secret, &canonical_query);
        // The exact string used for signing is reused verbatim, with only
        // `&signature=...` appended — never rebuilt via a second encoder.
        let full_query = format!("{canonical_query}&signature={signature}");
        let url = format!("{}{}?{}", self.base_url, path, full_query);

        let request = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .timeout(Duration::from_secs(10));

        let response = request.send().await.map_err(|e| ExchangeError::Transient(e.to_string()))?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("invalid response body: {e}")))?;

        if status.is_client_error() || status.is_server_error() {
            let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = body
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            if status.as_u16() == 400 && (code == -1022 || message.to_lowercase().contains("signature")) {
                return Err(ExchangeError::AuthError {
                    diagnostic: format!("signature rejected (code={code}): {message}"),
                });
            }
            return Err(ExchangeError::ApiError { code, message });
        }

        Ok(body)
    }

    async fn public_get(&self, path: &str, params: &[(String, String)]) -> Result<serde_json::Value, ExchangeError> {
        let query = build_canonical_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(ExchangeError::Transient(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("invalid response body: {e}")))
    }

    fn decimal_or_zero(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap_or(Decimal::ZERO)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl ExchangePort for BinanceAdapter {
    async fn list_perpetual_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let body = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo =
            serde_json::from_value(body).map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL" && s.symbol.ends_with("USDT"))
            .map(|s| s.symbol)
            .collect())
    }

    async fn get_all_tickers_24h(&self) -> Result<Vec<Ticker>, ExchangeError> {
        let perpetuals = self.list_perpetual_symbols().await?;
        let body = self.public_get("/fapi/v1/ticker/24hr", &[]).await?;
        let rows: Vec<Ticker24h> =
            serde_json::from_value(body).map_err(|e| ExchangeError::Transient(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|r| perpetuals.contains(&r.symbol))
            .map(|r| Ticker {
                symbol: r.symbol,
                last_price: Self::decimal_or_zero(&r.last_price),
                price_change_percent: Self::decimal_or_zero(&r.price_change_percent),
                base_volume: Self::decimal_or_zero(&r.volume),
                quote_volume: Self::decimal_or_zero(&r.quote_volume),
                high: Self::decimal_or_zero(&r.high_price),
                low: Self::decimal_or_zero(&r.low_price),
                open: Self::decimal_or_zero(&r.open_price),
                trades: r.count,
            })
            .collect())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        include_open: bool,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut remaining = limit;
        let mut end_time: Option<i64> = None;
        let mut pages: Vec<Vec<Candle>> = Vec::new();

        while remaining > 0 {
            let page_limit = remaining.min(MAX_KLINE_PAGE);
            let mut params = vec![
                ("symbol".to_string(), symbol.to_string()),
                ("interval".to_string(), tf.as_binance_interval()),
                ("limit".to_string(), page_limit.to_string()),
            ];
            if let Some(end) = end_time {
                params.push(("endTime".to_string(), end.to_string()));
            }

            let body = self.public_get("/fapi/v1/klines", &params).await?;
            let rows = body
                .as_array()
                .ok_or_else(|| ExchangeError::Transient("klines response was not an array".into()))?;

            let mut page_candles: Vec<Candle> = Vec::with_capacity(rows.len());
            for row in rows {
                if let Some((open_time, open, high, low, close, volume, close_time)) = wire::parse_kline_row(row) {
                    let is_closed = now_ms() >= close_time;
                    page_candles.push(Candle {
                        open_time_ms: open_time,
                        open: Self::decimal_or_zero(&open),
                        high: Self::decimal_or_zero(&high),
                        low: Self::decimal_or_zero(&low),
                        close: Self::decimal_or_zero(&close),
                        volume: Self::decimal_or_zero(&volume),
                        is_closed,
                    });
                }
            }

            if page_candles.is_empty() {
                break;
            }

            let earliest_open = page_candles.first().map(|c| c.open_time_ms).unwrap_or(0);
            remaining = remaining.saturating_sub(page_candles.len());
            pages.push(page_candles);
            end_time = Some(earliest_open - 1);

            if remaining > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let mut all: Vec<Candle> = pages.into_iter().flatten().collect();
        all.sort_by_key(|c| c.open_time_ms);
        all.dedup_by_key(|c| c.open_time_ms);

        if !include_open {
            all.retain(|c| c.is_closed);
        }

        Ok(all)
    }

    async fn get_balance(&self) -> Result<Decimal, ExchangeError> {
        let body = self.signed_request(reqwest::Method::GET, "/fapi/v2/account", vec![]).await?;
        let info: AccountInfo = serde_json::from_value(body).map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok(info
            .assets
            .into_iter()
            .find(|a| a.asset == "USDT")
            .map(|a| Self::decimal_or_zero(&a.available_balance))
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_closed_trades(
        &self,
        symbol: Option<&str>,
        limit: usize,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<ClosedTrade> {
        let Some(symbol) = symbol else { return Vec::new() };

        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), limit.min(MAX_KLINE_PAGE).to_string()),
        ];
        let (start, end) = range.unwrap_or_else(|| (Utc::now() - chrono::Duration::hours(24), Utc::now()));
        params.push(("startTime".to_string(), start.timestamp_millis().to_string()));
        params.push(("endTime".to_string(), end.timestamp_millis().to_string()));

        let body = match self.signed_request(reqwest::Method::GET, "/fapi/v2/account/trades", params).await {
            Ok(b) => b,
            Err(e) => {
                warn!("get_closed_trades failed, treating as no history: {}", e);
                return Vec::new();
            }
        };

        let rows: Vec<AccountTrade> = match serde_json::from_value(body) {
            Ok(r) => r,
            Err(e) => {
                warn!("get_closed_trades: failed to parse rows: {}", e);
                return Vec::new();
            }
        };

        pair_trades_into_closed(rows, symbol)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("leverage".to_string(), leverage.to_string()),
        ];
        match self.signed_request(reqwest::Method::POST, "/fapi/v1/leverage", params).await {
            Ok(_) => Ok(()),
            Err(ExchangeError::ApiError { code, message }) => {
                let e = ExchangeError::ApiError { code, message };
                if e.is_noop_business_error() {
                    debug!("set_leverage no-op: {}", e);
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError> {
        let margin_str = match margin_type {
            MarginType::Isolated => "ISOLATED",
            MarginType::Crossed => "CROSSED",
        };
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("marginType".to_string(), margin_str.to_string()),
        ];
        match self.signed_request(reqwest::Method::POST, "/fapi/v1/marginType", params).await {
            Ok(_) => Ok(()),
            Err(ExchangeError::ApiError { code, message }) => {
                let e = ExchangeError::ApiError { code, message };
                if e.is_noop_business_error() {
                    debug!("set_margin_type no-op: {}", e);
                    Ok(())
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let side_str = match req.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let position_side_str = match req.position_side {
            crate::domain::types::PositionSide::Long => "LONG",
            crate::domain::types::PositionSide::Short => "SHORT",
        };

        let mut params = vec![
            ("symbol".to_string(), req.symbol.clone()),
            ("side".to_string(), side_str.to_string()),
            ("positionSide".to_string(), position_side_str.to_string()),
            ("type".to_string(), req.order_type.as_binance_str().to_string()),
        ];

        if req.close_position {
            params.push(("closePosition".to_string(), "true".to_string()));
        } else if let Some(qty) = req.quantity {
            params.push(("quantity".to_string(), format_decimal(qty)));
        }

        if let Some(price) = req.price {
            params.push(("price".to_string(), format_decimal(price)));
        }
        if let Some(stop_price) = req.stop_price {
            params.push(("stopPrice".to_string(), format_decimal(stop_price)));
        }

        let body = self.signed_request(reqwest::Method::POST, "/fapi/v1/order", params).await?;
        let resp: OrderResponse = serde_json::from_value(body).map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok(PlacedOrder { order_id: resp.order_id.to_string(), symbol: resp.symbol })
    }

    async fn get_position(&self, symbol: Option<&str>) -> Result<Vec<PositionRow>, ExchangeError> {
        let mut params = Vec::new();
        if let Some(s) = symbol {
            params.push(("symbol".to_string(), s.to_string()));
        }
        let body = self.signed_request(reqwest::Method::GET, "/fapi/v2/positionRisk", params).await?;
        let rows: Vec<PositionRiskRow> = serde_json::from_value(body).map_err(|e| ExchangeError::Transient(e.to_string()))?;

        const EPSILON: Decimal = rust_decimal_macros::dec!(0.0000001);
        Ok(rows
            .into_iter()
            .map(|r| PositionRow {
                symbol: r.symbol,
                position_amount: Self::decimal_or_zero(&r.position_amt),
                entry_price: Self::decimal_or_zero(&r.entry_price),
            })
            .filter(|r| r.position_amount.abs() > EPSILON)
            .collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        match self.signed_request(reqwest::Method::DELETE, "/fapi/v1/order", params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("cancel_order failed for {} {}: {}", symbol, order_id, e);
                Err(e)
            }
        }
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        self.signed_request(reqwest::Method::DELETE, "/fapi/v1/allOpenOrders", params).await?;
        Ok(())
    }
}

/// One order's fills collapsed into a single quantity-weighted row, the way
/// the original groups `f"{symbol}_{order_id}"` before pairing.
struct OrderFill {
    side: String,
    avg_price: Decimal,
    total_qty: Decimal,
    realized_pnl: Decimal,
    time: i64,
}

/// Groups same-`orderId` fills and averages their price weighted by
/// quantity, per `spec.md:186` ("group by `symbol|orderId`; pair buys with
/// sells; for each complete trade compute average entry/exit prices").
fn aggregate_fills_by_order(rows: &[AccountTrade]) -> Vec<OrderFill> {
    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap_or(Decimal::ZERO)
    }

    let mut groups: BTreeMap<i64, Vec<&AccountTrade>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.order_id).or_default().push(row);
    }

    groups
        .into_values()
        .filter_map(|fills| {
            let side = fills.first()?.side.clone();
            let total_qty = fills.iter().fold(Decimal::ZERO, |acc, f| acc + dec(&f.qty));
            if total_qty.is_zero() {
                return None;
            }
            let weighted_price = fills.iter().fold(Decimal::ZERO, |acc, f| acc + dec(&f.price) * dec(&f.qty));
            let realized_pnl = fills.iter().fold(Decimal::ZERO, |acc, f| acc + dec(&f.realized_pnl));
            let time = fills.iter().map(|f| f.time).min()?;
            Some(OrderFill { side, avg_price: weighted_price / total_qty, total_qty, realized_pnl, time })
        })
        .collect()
}

/// Approximates round-trip pairing of buy/sell orders into closed trades by
/// grouping same-`orderId` fills into a single weighted-average row, then
/// pairing the most recent unmatched buy order against the most recent
/// unmatched sell order, per `spec.md` §9 Open Question (i): this is an
/// approximation the spec itself calls out as a placeholder pending a
/// user-data-stream-backed pairing.
fn pair_trades_into_closed(rows: Vec<AccountTrade>, symbol: &str) -> Vec<ClosedTrade> {
    let mut orders = aggregate_fills_by_order(&rows);
    orders.sort_by_key(|o| o.time);

    let mut buys: Vec<OrderFill> = Vec::new();
    let mut sells: Vec<OrderFill> = Vec::new();
    for order in orders {
        if order.side == "BUY" {
            buys.push(order);
        } else {
            sells.push(order);
        }
    }

    let mut closed = Vec::new();
    while let (Some(buy), Some(sell)) = (buys.pop(), sells.pop()) {
        let qty = buy.total_qty.min(sell.total_qty);
        if qty.is_zero() {
            continue;
        }
        let (opened_at, closed_at, side) = if buy.time <= sell.time {
            (buy.time, sell.time, OrderSide::Buy)
        } else {
            (sell.time, buy.time, OrderSide::Sell)
        };
        closed.push(ClosedTrade {
            symbol: symbol.to_string(),
            side,
            avg_entry_price: buy.avg_price,
            avg_exit_price: sell.avg_price,
            quantity: qty,
            pnl: sell.realized_pnl + buy.realized_pnl,
            opened_at: DateTime::from_timestamp_millis(opened_at).unwrap_or_else(Utc::now),
            closed_at: DateTime::from_timestamp_millis(closed_at).unwrap_or_else(Utc::now),
        });
    }

    closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_buy_and_sell_rows_by_time_order() {
        let rows = vec![
            AccountTrade {
                symbol: "BTCUSDT".into(),
                id: 1,
                order_id: 100,
                side: "BUY".into(),
                price: "50000".into(),
                qty: "0.5".into(),
                realized_pnl: "0".into(),
                time: 1000,
            },
            AccountTrade {
                symbol: "BTCUSDT".into(),
                id: 2,
                order_id: 101,
                side: "SELL".into(),
                price: "50400".into(),
                qty: "0.5".into(),
                realized_pnl: "200".into(),
                time: 2000,
            },
        ];
        let closed = pair_trades_into_closed(rows, "BTCUSDT");
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].pnl, Decimal::from_str("200").unwrap());
    }

    #[test]
    fn averages_multiple_fills_of_the_same_order_weighted_by_quantity() {
        let rows = vec![
            AccountTrade {
                symbol: "BTCUSDT".into(),
                id: 1,
                order_id: 100,
                side: "BUY".into(),
                price: "50000".into(),
                qty: "0.3".into(),
                realized_pnl: "0".into(),
                time: 1000,
            },
            AccountTrade {
                symbol: "BTCUSDT".into(),
                id: 2,
                order_id: 100,
                side: "BUY".into(),
                price: "50100".into(),
                qty: "0.7".into(),
                realized_pnl: "0".into(),
                time: 1001,
            },
            AccountTrade {
                symbol: "BTCUSDT".into(),
                id: 3,
                order_id: 200,
                side: "SELL".into(),
                price: "50500".into(),
                qty: "1.0".into(),
                realized_pnl: "350".into(),
                time: 2000,
            },
        ];
        let closed = pair_trades_into_closed(rows, "BTCUSDT");
        assert_eq!(closed.len(), 1);
        // (50000*0.3 + 50100*0.7) / 1.0 = 50070
        assert_eq!(closed[0].avg_entry_price, Decimal::from_str("50070").unwrap());
        assert_eq!(closed[0].quantity, Decimal::from_str("1.0").unwrap());
    }
}
