//! C9 — scanner scheduler: universe selection, bounded-concurrency analysis
//! fan-out, auto-scan alignment to kline boundaries, and the learning/review
//! post-hooks (`spec.md` §4.9).

use crate::application::advisor::Advisor;
use crate::application::indicator_engine::IndicatorEngine;
use crate::application::trader::Trader;
use crate::config::{KlineType, ScanType};
use crate::domain::context::ReviewedSymbolRecord;
use crate::domain::ports::{ContextStorePort, ExchangePort};
use crate::domain::symbol;
use crate::domain::time::{self, Timeframe};
use crate::domain::types::{Action, AnalysisResult, Ticker};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

const RETENTION_DAYS: i64 = 2;
const SLEEP_SLICE: TokioDuration = TokioDuration::from_secs(10);

pub struct ScannerConfig {
    pub timeframe: String,
    pub lookback: usize,
    pub kline_type: KlineType,
    pub custom_symbols: Vec<String>,
    pub scan_types: Vec<ScanType>,
    pub scan_top_n: usize,
    pub default_quote: String,
    pub max_concurrent_analysis: usize,
    pub confidence_threshold: f64,
    pub save_analysis_results: bool,
    pub analysis_results_dir: PathBuf,
    pub enable_auto_learning: bool,
    pub enable_auto_review: bool,
    pub auto_learning_topics: Vec<String>,
}

pub struct Scanner {
    exchange: Arc<dyn ExchangePort>,
    indicator_engine: Arc<IndicatorEngine>,
    advisor: Arc<Advisor>,
    trader: Option<Arc<Trader>>,
    context_store: Arc<dyn ContextStorePort>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        indicator_engine: Arc<IndicatorEngine>,
        advisor: Arc<Advisor>,
        trader: Option<Arc<Trader>>,
        context_store: Arc<dyn ContextStorePort>,
        config: ScannerConfig,
    ) -> Self {
        Self { exchange, indicator_engine, advisor, trader, context_store, config }
    }

    /// Custom symbols (smart-completed against the live universe) when
    /// configured, else the union of each enabled scan type's top-N ranked
    /// symbols, first-occurrence-ordered and truncated to `scan_top_n`.
    async fn select_universe(&self) -> anyhow::Result<Vec<String>> {
        if !self.config.custom_symbols.is_empty() {
            let perpetuals = self.exchange.list_perpetual_symbols().await?;
            let mut resolved = Vec::new();
            for raw in &self.config.custom_symbols {
                let hits = symbol::smart_search(raw, &perpetuals, &self.config.default_quote);
                if let Some(&hit) = hits.first() {
                    let hit = hit.to_string();
                    if !resolved.contains(&hit) {
                        resolved.push(hit);
                    }
                } else {
                    let completed = symbol::normalize_or_complete(raw, &self.config.default_quote);
                    warn!(
                        "scanner: custom symbol '{}' not found in live universe, using completed form '{}' speculatively",
                        raw, completed
                    );
                    if !resolved.contains(&completed) {
                        resolved.push(completed);
                    }
                }
            }
            return Ok(resolved);
        }

        let tickers = self.exchange.get_all_tickers_24h().await?;
        let mut union = Vec::new();
        for scan_type in &self.config.scan_types {
            let ranked = rank_symbols(&tickers, *scan_type);
            for s in ranked.into_iter().take(self.config.scan_top_n) {
                if !union.contains(&s) {
                    union.push(s);
                }
            }
        }
        union.truncate(self.config.scan_top_n);
        Ok(union)
    }

    /// Runs one batch: universe selection, bounded-concurrency per-symbol
    /// analysis (and conditional trade execution), optional persistence.
    pub async fn run_scan_once(&self) -> Vec<AnalysisResult> {
        let tf = match Timeframe::from_str(&self.config.timeframe) {
            Ok(tf) => tf,
            Err(e) => {
                error!("scanner: invalid timeframe '{}': {}", self.config.timeframe, e);
                return Vec::new();
            }
        };

        let symbols = match self.select_universe().await {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => {
                warn!("scanner: universe selection produced no symbols");
                return Vec::new();
            }
            Err(e) => {
                error!("scanner: universe selection failed: {}", e);
                return Vec::new();
            }
        };

        info!("scanner: batch starting over {} symbols", symbols.len());

        let balance_f64 = match self.exchange.get_balance().await {
            Ok(b) => b.to_f64().unwrap_or(0.0),
            Err(e) => {
                warn!("scanner: get_balance failed, trading suspended for this batch: {}", e);
                0.0
            }
        };

        let include_open = self.config.kline_type == KlineType::Open;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_analysis.max(1)));
        let mut handles = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            let semaphore = semaphore.clone();
            let exchange = self.exchange.clone();
            let indicator_engine = self.indicator_engine.clone();
            let advisor = self.advisor.clone();
            let trader = self.trader.clone();
            let timeframe_str = self.config.timeframe.clone();
            let lookback = self.config.lookback;
            let confidence_threshold = self.config.confidence_threshold;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
                run_symbol_pipeline(
                    exchange,
                    indicator_engine,
                    advisor,
                    trader,
                    symbol,
                    tf,
                    timeframe_str,
                    lookback,
                    include_open,
                    confidence_threshold,
                    balance_f64,
                )
                .await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => error!("scanner: analysis task panicked: {}", e),
            }
        }

        if self.config.save_analysis_results {
            self.persist_batch(&results).await;
        }

        results
    }

    /// Learning and review post-hooks, run after every batch regardless of
    /// whether `run_scan_once` is driven by the auto loop or called once.
    pub async fn run_post_hooks(&self, results: &[AnalysisResult]) {
        if self.config.enable_auto_learning {
            self.run_learning_hook(results).await;
        }
        if self.config.enable_auto_review {
            self.run_review_hook().await;
        }
    }

    /// Up to 2 topics: configured topics take priority, else the two
    /// highest-confidence actionable results from this batch.
    async fn run_learning_hook(&self, results: &[AnalysisResult]) {
        let topics: Vec<String> = if !self.config.auto_learning_topics.is_empty() {
            self.config.auto_learning_topics.iter().take(2).cloned().collect()
        } else {
            let mut actionable: Vec<&AnalysisResult> = results.iter().filter(|r| r.action != Action::Wait).collect();
            actionable.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
            actionable
                .into_iter()
                .take(2)
                .map(|r| format!("{} {} at confidence {:.2}", r.symbol, r.trend, r.confidence))
                .collect()
        };

        for topic in topics {
            let content = self.advisor.provide_learning(&topic).await;
            debug!("scanner: learning captured for '{}' ({} chars)", topic, content.len());
        }
    }

    /// Reviews the most recent closed trade per symbol in the current
    /// universe, skipping symbols already reviewed today.
    async fn run_review_hook(&self) {
        let reviewed_today = self.context_store.reviewed_symbols_today().await;
        let range = Some((Utc::now() - chrono::Duration::hours(24), Utc::now()));

        let symbols = match self.select_universe().await {
            Ok(s) => s,
            Err(e) => {
                warn!("scanner: review hook could not resolve universe: {}", e);
                return;
            }
        };

        for symbol in symbols {
            if reviewed_today.contains_key(&symbol) {
                continue;
            }
            let trades = self.exchange.get_closed_trades(Some(&symbol), 50, range).await;
            let Some(trade) = trades.into_iter().next() else { continue };

            let review = self.advisor.review_trade(&trade).await;
            let trade_info = format!("pnl={} qty={}", trade.pnl, trade.quantity);
            self.context_store
                .mark_reviewed(symbol.clone(), ReviewedSymbolRecord { reviewed_at: Utc::now(), trade_info })
                .await;
            info!("scanner: reviewed {} with score {:.2}", symbol, review.score);
        }
    }

    async fn persist_batch(&self, results: &[AnalysisResult]) {
        if results.is_empty() {
            return;
        }
        let now = Utc::now();
        let date_dir = self.config.analysis_results_dir.join(now.format("%Y-%m-%d").to_string());
        if let Err(e) = tokio::fs::create_dir_all(&date_dir).await {
            warn!("scanner: failed to create analysis results dir {:?}: {}", date_dir, e);
            return;
        }

        let file_path = date_dir.join(format!("analysis_{}.json", now.format("%H%M%S")));
        match serde_json::to_vec_pretty(results) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&file_path, bytes).await {
                    warn!("scanner: failed to write analysis batch {:?}: {}", file_path, e);
                }
            }
            Err(e) => warn!("scanner: failed to serialize analysis batch: {}", e),
        }

        self.sweep_retention(now).await;
    }

    /// Runs at most once per 24h, gated by a `.last_cleanup` marker holding
    /// the last sweep's unix-millis timestamp; removes date directories
    /// older than `RETENTION_DAYS`.
    async fn sweep_retention(&self, now: DateTime<Utc>) {
        let marker_path = self.config.analysis_results_dir.join(".last_cleanup");
        let should_run = match tokio::fs::read_to_string(&marker_path).await {
            Ok(contents) => match contents.trim().parse::<i64>() {
                Ok(last_ms) => now.timestamp_millis() - last_ms > chrono::Duration::hours(24).num_milliseconds(),
                Err(_) => true,
            },
            Err(_) => true,
        };
        if !should_run {
            return;
        }

        if let Ok(mut entries) = tokio::fs::read_dir(&self.config.analysis_results_dir).await {
            let cutoff = now - chrono::Duration::days(RETENTION_DAYS);
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                if let Ok(dir_date) = chrono::NaiveDate::parse_from_str(name, "%Y-%m-%d") {
                    let Some(midnight) = dir_date.and_hms_opt(0, 0, 0) else { continue };
                    if midnight.and_utc() < cutoff {
                        match tokio::fs::remove_dir_all(&path).await {
                            Ok(()) => info!("scanner: retention sweep removed stale analysis dir {:?}", path),
                            Err(e) => warn!("scanner: retention sweep failed to remove {:?}: {}", path, e),
                        }
                    }
                }
            }
        }

        let _ = tokio::fs::write(&marker_path, now.timestamp_millis().to_string()).await;
    }

    /// Runs batches until `stop` is set, sleeping until the next kline
    /// boundary when `KLINE_TYPE=closed`, else a fixed 60s between scans;
    /// sleeps are sliced so `stop` is checked at least every 10s.
    pub async fn run_auto_loop(&self, stop: Arc<AtomicBool>) {
        let tf = match Timeframe::from_str(&self.config.timeframe) {
            Ok(tf) => tf,
            Err(e) => {
                error!("scanner: invalid timeframe, aborting auto loop: {}", e);
                return;
            }
        };

        while !stop.load(AtomicOrdering::SeqCst) {
            let results = self.run_scan_once().await;
            if results.is_empty() {
                warn!("scanner: batch produced no results, retrying in 30s");
                sleep_cancelable(TokioDuration::from_secs(30), &stop).await;
                continue;
            }

            self.run_post_hooks(&results).await;

            if self.config.kline_type == KlineType::Closed {
                let remaining = time::time_until_next_kline(tf, Utc::now().timestamp_millis());
                let remaining_std = remaining.to_std().unwrap_or(TokioDuration::from_secs(60));
                sleep_cancelable(remaining_std, &stop).await;
            } else {
                sleep_cancelable(TokioDuration::from_secs(60), &stop).await;
            }
        }
    }
}

async fn sleep_cancelable(total: TokioDuration, stop: &AtomicBool) {
    let mut remaining = total;
    while remaining > TokioDuration::ZERO {
        if stop.load(AtomicOrdering::SeqCst) {
            return;
        }
        let this_slice = remaining.min(SLEEP_SLICE);
        sleep(this_slice).await;
        remaining -= this_slice;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_symbol_pipeline(
    exchange: Arc<dyn ExchangePort>,
    indicator_engine: Arc<IndicatorEngine>,
    advisor: Arc<Advisor>,
    trader: Option<Arc<Trader>>,
    symbol: String,
    tf: Timeframe,
    timeframe_str: String,
    lookback: usize,
    include_open: bool,
    confidence_threshold: f64,
    balance_f64: f64,
) -> Option<AnalysisResult> {
    let candles = match exchange.get_klines(&symbol, tf, lookback, include_open).await {
        Ok(c) => c,
        Err(e) => {
            warn!("scanner: get_klines failed for {}: {}", symbol, e);
            return None;
        }
    };
    if candles.len() < 2 {
        debug!("scanner: insufficient candle history for {}, skipping", symbol);
        return None;
    }

    let indicators = indicator_engine.compute(&candles);
    let last = candles[candles.len() - 1];
    let prev = candles[candles.len() - 2];
    let last_close = last.close.to_f64().unwrap_or(0.0);
    let prev_close = prev.close.to_f64();
    let volume = last.volume.to_f64().unwrap_or(0.0);

    let result = advisor.analyze(&symbol, last_close, prev_close, volume, &indicators, &timeframe_str).await;

    if let Some(trader) = trader {
        if result.confidence >= confidence_threshold && result.action != Action::Wait {
            let trade_result = trader.execute_trade(&result, balance_f64).await;
            if trade_result.success {
                info!("scanner: trade executed for {}: {}", symbol, trade_result.message);
            } else {
                warn!("scanner: trade not executed for {}: {}", symbol, trade_result.message);
            }
        }
    }

    Some(result)
}

/// `volume`: quote-volume descending. `gainers`: 24h change descending.
/// `losers`: 24h change ascending. `hot`: `0.7·(volume/1e9) + 0.3·(|change|/100)`
/// descending.
fn rank_symbols(tickers: &[Ticker], scan_type: ScanType) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = tickers
        .iter()
        .map(|t| {
            let change = t.price_change_percent.to_f64().unwrap_or(0.0);
            let quote_volume = t.quote_volume.to_f64().unwrap_or(0.0);
            let score = match scan_type {
                ScanType::Volume => quote_volume,
                ScanType::Gainers => change,
                ScanType::Losers => -change,
                ScanType::Hot => 0.7 * (quote_volume / 1_000_000_000.0) + 0.3 * (change.abs() / 100.0),
            };
            (t.symbol.clone(), score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(s, _)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr as _;

    fn ticker(symbol: &str, change_pct: &str, quote_volume: &str) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: Decimal::from_str("1").unwrap(),
            price_change_percent: Decimal::from_str(change_pct).unwrap(),
            base_volume: Decimal::from_str("1").unwrap(),
            quote_volume: Decimal::from_str(quote_volume).unwrap(),
            high: Decimal::from_str("1").unwrap(),
            low: Decimal::from_str("1").unwrap(),
            open: Decimal::from_str("1").unwrap(),
            trades: 0,
        }
    }

    #[test]
    fn ranks_volume_descending() {
        let tickers = vec![
            ticker("AAA", "1.0", "1000"),
            ticker("BBB", "1.0", "5000"),
            ticker("CCC", "1.0", "2000"),
        ];
        let ranked = rank_symbols(&tickers, ScanType::Volume);
        assert_eq!(ranked, vec!["BBB", "CCC", "AAA"]);
    }

    #[test]
    fn ranks_gainers_and_losers_by_opposite_change_order() {
        let tickers = vec![
            ticker("UP", "8.0", "1000"),
            ticker("FLAT", "0.0", "1000"),
            ticker("DOWN", "-5.0", "1000"),
        ];
        let gainers = rank_symbols(&tickers, ScanType::Gainers);
        assert_eq!(gainers, vec!["UP", "FLAT", "DOWN"]);

        let losers = rank_symbols(&tickers, ScanType::Losers);
        assert_eq!(losers, vec!["DOWN", "FLAT", "UP"]);
    }

    #[test]
    fn hot_score_blends_volume_and_change_magnitude() {
        let tickers = vec![
            ticker("BIGVOL", "0.1", "3000000000"),
            ticker("BIGMOVE", "50.0", "10000000"),
        ];
        let ranked = rank_symbols(&tickers, ScanType::Hot);
        assert_eq!(ranked.first().unwrap(), "BIGVOL");
    }
}
