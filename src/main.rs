//! Headless entrypoint: no UI, no HTTP server, one scan loop driving the
//! advisor and (outside observe mode) the trader.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

use tradeadvisor::application::advisor::{Advisor, AdvisorConfig};
use tradeadvisor::application::context_store::JsonFileContextStore;
use tradeadvisor::application::indicator_engine::IndicatorEngine;
use tradeadvisor::application::prompt_templates::PromptTemplates;
use tradeadvisor::application::scanner::{Scanner, ScannerConfig};
use tradeadvisor::application::trader::Trader;
use tradeadvisor::config::Config;
use tradeadvisor::domain::ports::{ChatClient, ContextStorePort, ExchangePort};
use tradeadvisor::infrastructure::binance::BinanceAdapter;
use tradeadvisor::infrastructure::llm::{MockChatClient, OpenAiCompatibleChatClient};

const LOG_RETENTION: chrono::Duration = chrono::Duration::hours(3);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    std::fs::create_dir_all("logs").context("failed to create logs directory")?;
    let log_path = PathBuf::from(format!("logs/trading_{}.log", Utc::now().format("%Y%m%d")));
    trim_old_log_entries(&log_path, LOG_RETENTION);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("failed to open log file")?;

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(move || log_file.try_clone().expect("log file handle"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("tradeadvisor {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "configuration loaded: environment={:?} auto_scan={} timeframe={}",
        config.broker.environment, config.scan.auto_scan, config.scan.timeframe
    );

    let binance = BinanceAdapter::new(
        config.broker.base_url.clone(),
        config.broker.api_key.clone(),
        config.broker.api_secret.clone(),
    );
    binance.sync_time().await;
    let exchange: Arc<dyn ExchangePort> = Arc::new(binance);

    let chat_client: Arc<dyn ChatClient> =
        if config.advisor.use_ai_analysis && config.advisor.provider != "mock" && !config.advisor.api_key.is_empty() {
            info!("using LLM provider '{}' at {}", config.advisor.provider, config.advisor.base_url);
            Arc::new(OpenAiCompatibleChatClient::new(
                config.advisor.base_url.clone(),
                config.advisor.api_key.clone(),
                config.advisor.model.clone(),
            ))
        } else {
            info!("AI analysis disabled or unconfigured, using mock chat client");
            Arc::new(MockChatClient)
        };

    let context_store: Arc<dyn ContextStorePort> = JsonFileContextStore::new(PathBuf::from("data/context"));
    let indicator_engine = Arc::new(IndicatorEngine::from_spec_str(&config.indicator_spec));
    let templates = PromptTemplates::load(Path::new("prompts"));

    let advisor_config = AdvisorConfig {
        provider_name: config.advisor.provider.clone(),
        account_balance: config.risk.account_balance,
        risk_percent: config.risk.risk_percent,
        risk_reward_ratio: config.risk.risk_reward_ratio,
        atr_multiplier: config.risk.atr_multiplier,
        max_leverage: config.risk.max_leverage,
    };
    let advisor = Arc::new(Advisor::new(chat_client, context_store.clone(), templates, advisor_config));

    let trader = if config.broker.environment.is_observe() {
        info!("observe mode: analysis only, no orders will be placed");
        None
    } else {
        Some(Arc::new(Trader::new(exchange.clone(), config.risk.max_loss_per_trade, config.risk.max_position_size)))
    };

    let scanner_config = ScannerConfig {
        timeframe: config.scan.timeframe.clone(),
        lookback: config.scan.lookback,
        kline_type: config.scan.kline_type,
        custom_symbols: config.scan.custom_symbols.clone(),
        scan_types: config.scan.scan_types.clone(),
        scan_top_n: config.scan.scan_top_n,
        default_quote: config.scan.default_quote.clone(),
        max_concurrent_analysis: config.advisor.max_concurrent_analysis,
        confidence_threshold: config.advisor.confidence_threshold,
        save_analysis_results: config.observability.save_analysis_results,
        analysis_results_dir: PathBuf::from(&config.observability.analysis_results_dir),
        enable_auto_learning: config.observability.enable_auto_learning,
        enable_auto_review: config.observability.enable_auto_review,
        auto_learning_topics: config.observability.auto_learning_topics.clone(),
    };

    let scanner = Scanner::new(exchange, indicator_engine, advisor, trader, context_store, scanner_config);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stop_for_signal.store(true, Ordering::SeqCst);
        }
    });

    if config.scan.auto_scan {
        info!("running in auto-scan loop");
        scanner.run_auto_loop(stop).await;
    } else {
        info!("running a single scan");
        let results = scanner.run_scan_once().await;
        scanner.run_post_hooks(&results).await;
        info!("single scan complete: {} result(s)", results.len());
    }

    info!("tradeadvisor shutting down");
    Ok(())
}

/// Drops log lines (and their un-stamped continuation lines) whose leading
/// RFC3339 timestamp is older than `max_age`, run once at startup per
/// `spec.md` §6's rolling-log retention requirement.
fn trim_old_log_entries(path: &Path, max_age: chrono::Duration) {
    let Ok(contents) = std::fs::read_to_string(path) else { return };
    let cutoff = Utc::now() - max_age;
    let mut kept = String::with_capacity(contents.len());
    let mut keep_current = true;

    for line in contents.lines() {
        if let Some(ts_token) = line.split_whitespace().next() {
            if let Ok(ts) = DateTime::parse_from_rfc3339(ts_token) {
                keep_current = ts.with_timezone(&Utc) >= cutoff;
            }
        }
        if keep_current {
            kept.push_str(line);
            kept.push('\n');
        }
    }

    let _ = std::fs::write(path, kept);
}
