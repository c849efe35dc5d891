//! C6 — advisor loop (`spec.md` §4.6): prompt assembly, LLM call, JSON-first
//! parse with heuristic fallback, and the mandatory risk-management override.

use crate::application::prompt_templates::{render, PromptKind, PromptTemplates};
use crate::domain::context::{LearningEntry, OptimizedStrategy, ReviewEntry};
use crate::domain::indicators::Series;
use crate::domain::ports::{ChatClient, ChatMessage, ChatRole, ContextStorePort};
use crate::domain::risk;
use crate::domain::types::{Action, AnalysisResult, ClosedTrade};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct AdvisorConfig {
    pub provider_name: String,
    pub account_balance: f64,
    pub risk_percent: f64,
    pub risk_reward_ratio: f64,
    pub atr_multiplier: f64,
    pub max_leverage: u32,
}

pub struct Advisor {
    chat_client: Arc<dyn ChatClient>,
    context_store: Arc<dyn ContextStorePort>,
    templates: PromptTemplates,
    config: AdvisorConfig,
}

impl Advisor {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        context_store: Arc<dyn ContextStorePort>,
        templates: PromptTemplates,
        config: AdvisorConfig,
    ) -> Self {
        Self { chat_client, context_store, templates, config }
    }

    /// `prepareMarketData`: OHLCV snapshot, change%, formatted volume, and an
    /// indicator block (or a single warning line when nothing is defined).
    fn prepare_market_data(
        &self,
        symbol: &str,
        last_close: f64,
        prev_close: Option<f64>,
        volume: f64,
        indicators: &HashMap<String, Series>,
    ) -> (String, HashMap<String, String>) {
        let change_pct = match prev_close {
            Some(prev) if prev > 0.0 => (last_close - prev) / prev * 100.0,
            _ => 0.0,
        };

        let mut lines = Vec::new();
        lines.push(format!("close={last_close:.6} change={change_pct:+.2}% volume={volume:.2}"));

        let mut defined = 0;
        for (name, series) in indicators {
            if let Some(&last) = series.last() {
                if !last.is_nan() {
                    lines.push(format!("{name}={last:.6}"));
                    defined += 1;
                }
            }
        }

        let indicator_block = if defined == 0 {
            "WARNING: no indicators produced a defined value for this symbol yet (insufficient warm-up).".to_string()
        } else {
            lines[1..].join("\n")
        };

        let mut vars = HashMap::new();
        vars.insert("symbol".to_string(), symbol.to_string());
        vars.insert("market_data".to_string(), lines[0].clone());
        vars.insert("indicator_block".to_string(), indicator_block.clone());

        (indicator_block, vars)
    }

    /// `reviewInsights`: up to 2 recent learning excerpts, union of up to 5
    /// lessons/improvements across the last 5 reviews, up to 3 warnings, up
    /// to 3 optimized-strategy blocks.
    async fn review_insights(&self) -> String {
        let learnings = self.context_store.load_learning_results().await;
        let reviews = self.context_store.load_review_knowledge().await;
        let strategies = self.context_store.load_optimized_strategies().await;

        let mut sections = Vec::new();

        let recent_learnings: Vec<String> = learnings
            .iter()
            .rev()
            .take(2)
            .map(|l| l.content.chars().take(200).collect::<String>())
            .collect();
        if !recent_learnings.is_empty() {
            sections.push(format!("Recent learnings:\n{}", recent_learnings.join("\n")));
        }

        let recent_reviews: Vec<&ReviewEntry> = reviews.iter().rev().take(5).collect();
        let lessons: Vec<String> = recent_reviews.iter().flat_map(|r| r.lessons.clone()).collect::<std::collections::BTreeSet<_>>().into_iter().take(5).collect();
        let improvements: Vec<String> = recent_reviews.iter().flat_map(|r| r.improvements.clone()).collect::<std::collections::BTreeSet<_>>().into_iter().take(5).collect();
        if !lessons.is_empty() {
            sections.push(format!("Lessons learned:\n{}", lessons.join("\n")));
        }
        if !improvements.is_empty() {
            sections.push(format!("Improvements to apply:\n{}", improvements.join("\n")));
        }

        let warnings: Vec<String> = recent_reviews.iter().flat_map(|r| r.weaknesses.clone()).take(3).collect();
        if !warnings.is_empty() {
            sections.push(format!("Warnings:\n{}", warnings.join("\n")));
        }

        let strategy_blocks: Vec<String> = strategies
            .iter()
            .rev()
            .take(3)
            .map(|s| format!("{}: rules={:?} entry={:?} exit={:?}", s.name, s.rules, s.entry_conditions, s.exit_rules))
            .collect();
        if !strategy_blocks.is_empty() {
            sections.push(format!("Optimized strategies:\n{}", strategy_blocks.join("\n")));
        }

        if sections.is_empty() {
            String::new()
        } else {
            format!("IMPORTANT — follow the lessons and strategies below:\n{}", sections.join("\n\n"))
        }
    }

    /// Runs the full analysis flow for one symbol and timeframe.
    pub async fn analyze(
        &self,
        symbol: &str,
        last_close: f64,
        prev_close: Option<f64>,
        volume: f64,
        indicators: &HashMap<String, Series>,
        timeframe: &str,
    ) -> AnalysisResult {
        let (_, mut vars) = self.prepare_market_data(symbol, last_close, prev_close, volume, indicators);
        vars.insert("timeframe".to_string(), timeframe.to_string());
        let insights = self.review_insights().await;
        vars.insert("review_insights".to_string(), insights);

        let prompt_set = self.templates.get(PromptKind::Analysis);
        let system = render(&prompt_set.system, &vars);
        let user = render(&prompt_set.user, &vars);

        let messages = vec![
            ChatMessage { role: ChatRole::System, content: system },
            ChatMessage { role: ChatRole::User, content: user },
        ];

        let raw = match self.chat_client.chat(&messages, prompt_set.temperature, prompt_set.max_tokens).await {
            Ok(text) => text,
            Err(e) => {
                warn!("advisor: LLM call failed for {}: {}", symbol, e);
                String::new()
            }
        };

        let (mut parsed, mut warnings) = parse_analysis_body(&raw, last_close);
        if raw.is_empty() {
            warnings.push("LLM call failed; no analysis produced".to_string());
        }

        apply_risk_override(&mut parsed, &mut warnings, last_close, indicators, &self.config);

        AnalysisResult {
            symbol: symbol.to_string(),
            trend: parsed.trend,
            action: parsed.action,
            confidence: parsed.confidence,
            entry: last_close,
            stop_loss: parsed.stop_loss,
            take_profit: parsed.take_profit,
            support: parsed.support,
            resistance: parsed.resistance,
            risk_reward: parsed.risk_reward,
            reason: parsed.reason,
            warnings,
            trading_standard: parsed.trading_standard,
            leverage: parsed.leverage,
            position_size: parsed.position_size,
            margin_required: parsed.margin_required,
            potential_profit: parsed.potential_profit,
            potential_loss: parsed.potential_loss,
            provider: self.config.provider_name.clone(),
            analyzed_at: Utc::now(),
        }
    }

    /// `provideLearning`: assembles the learning prompt for `topic`, calls
    /// the LLM, and appends the free-form result to the context store.
    pub async fn provide_learning(&self, topic: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), topic.to_string());
        let prompt_set = self.templates.get(PromptKind::Learning);
        let system = render(&prompt_set.system, &vars);
        let user = render(&prompt_set.user, &vars);

        let messages = vec![
            ChatMessage { role: ChatRole::System, content: system },
            ChatMessage { role: ChatRole::User, content: user },
        ];

        let content = self
            .chat_client
            .chat(&messages, prompt_set.temperature, prompt_set.max_tokens)
            .await
            .unwrap_or_else(|e| format!("learning call failed: {e}"));

        self.context_store
            .add_learning(LearningEntry { topic: topic.to_string(), content: content.clone(), created_at: Utc::now() })
            .await;

        content
    }

    /// `reviewTrade`: assembles the review prompt for a closed trade, parses
    /// the structured review, and triggers strategy optimization on success.
    pub async fn review_trade(&self, trade: &ClosedTrade) -> ReviewEntry {
        let trade_summary = format!(
            "{} {:?} entry={} exit={} qty={} pnl={} duration={}s",
            trade.symbol,
            trade.side,
            trade.avg_entry_price,
            trade.avg_exit_price,
            trade.quantity,
            trade.pnl,
            trade.duration().num_seconds(),
        );
        let mut vars = HashMap::new();
        vars.insert("trade_summary".to_string(), trade_summary);

        let prompt_set = self.templates.get(PromptKind::Review);
        let system = render(&prompt_set.system, &vars);
        let user = render(&prompt_set.user, &vars);
        let messages = vec![
            ChatMessage { role: ChatRole::System, content: system },
            ChatMessage { role: ChatRole::User, content: user },
        ];

        let raw = self.chat_client.chat(&messages, prompt_set.temperature, prompt_set.max_tokens).await.unwrap_or_default();
        let review = parse_review_body(&raw, trade);

        self.context_store.add_review(review.clone()).await;
        self.optimize_strategy(&review).await;
        review
    }

    /// Deterministic keyword-bucketing of a review's textual fields into
    /// rule/entry/exit buckets, then appends the synthesized strategy.
    async fn optimize_strategy(&self, review: &ReviewEntry) {
        let mut rules = Vec::new();
        let mut entry_conditions = Vec::new();
        let mut exit_rules = Vec::new();

        for text in review.improvements.iter().chain(review.lessons.iter()).chain(review.weaknesses.iter()) {
            if contains_any(text, &["止损", "stop", "风险"]) {
                rules.push(text.clone());
            } else if contains_any(text, &["入场", "entry", "买入", "卖出"]) {
                entry_conditions.push(text.clone());
            } else if contains_any(text, &["出场", "exit", "止盈"]) {
                exit_rules.push(text.clone());
            }
        }

        if rules.is_empty() && entry_conditions.is_empty() && exit_rules.is_empty() {
            return;
        }

        let now = Utc::now();
        let strategy = OptimizedStrategy {
            name: format!("优化策略_{}", now.format("%m%d_%H%M")),
            rules,
            entry_conditions,
            exit_rules,
            based_on_reviews: 1,
            optimization_points: review.improvements.clone(),
            created_at: now,
        };
        self.context_store.add_strategy(strategy).await;
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

struct ParsedAnalysis {
    trend: String,
    action: Action,
    confidence: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    support: Option<f64>,
    resistance: Option<f64>,
    risk_reward: Option<f64>,
    reason: String,
    trading_standard: Option<String>,
    leverage: Option<u32>,
    position_size: Option<f64>,
    margin_required: Option<f64>,
    potential_profit: Option<f64>,
    potential_loss: Option<f64>,
}

impl Default for ParsedAnalysis {
    fn default() -> Self {
        Self {
            trend: "sideways".to_string(),
            action: Action::Wait,
            confidence: 0.5,
            stop_loss: None,
            take_profit: None,
            support: None,
            resistance: None,
            risk_reward: None,
            reason: String::new(),
            trading_standard: None,
            leverage: None,
            position_size: None,
            margin_required: None,
            potential_profit: None,
            potential_loss: None,
        }
    }
}

/// Extracts JSON first from a fenced code block, else from the first `{` to
/// the last `}`; on total failure scans the body for keywords.
fn parse_analysis_body(body: &str, last_close: f64) -> (ParsedAnalysis, Vec<String>) {
    if let Some(json_str) = extract_json(body) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_str) {
            return (parsed_from_json(&value), Vec::new());
        }
    }

    let mut warnings = vec!["AI response not JSON".to_string()];
    (heuristic_parse(body, last_close, &mut warnings), warnings)
}

fn extract_json(body: &str) -> Option<String> {
    if let Some(fence_start) = body.find("```json") {
        let after = &body[fence_start + 7..];
        if let Some(fence_end) = after.find("```") {
            return Some(after[..fence_end].trim().to_string());
        }
    }
    if let Some(fence_start) = body.find("```") {
        let after = &body[fence_start + 3..];
        if let Some(fence_end) = after.find("```") {
            let candidate = after[..fence_end].trim();
            if candidate.starts_with('{') {
                return Some(candidate.to_string());
            }
        }
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end > start {
        Some(body[start..=end].to_string())
    } else {
        None
    }
}

fn parsed_from_json(value: &serde_json::Value) -> ParsedAnalysis {
    let mut out = ParsedAnalysis::default();
    if let Some(trend) = value.get("trend").and_then(|v| v.as_str()) {
        out.trend = trend.to_string();
    }
    out.action = action_from_text(value.get("action").and_then(|v| v.as_str()).unwrap_or("观望"));
    out.confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
    out.stop_loss = value.get("stopLoss").and_then(|v| v.as_f64());
    out.take_profit = value.get("takeProfit").and_then(|v| v.as_f64());
    out.support = value.get("support").and_then(|v| v.as_f64());
    out.resistance = value.get("resistance").and_then(|v| v.as_f64());
    out.reason = value.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
    out.trading_standard = value.get("tradingStandard").and_then(|v| v.as_str()).map(str::to_string);
    out
}

fn action_from_text(text: &str) -> Action {
    let lower = text.to_lowercase();
    if text.contains("做多") || lower.contains("buy") || lower.contains("long") {
        Action::Long
    } else if text.contains("做空") || lower.contains("sell") || lower.contains("short") {
        Action::Short
    } else {
        Action::Wait
    }
}

/// `action` from `{做多,buy,long} / {做空,sell,short} / else 观望`;
/// `confidence` 0.8 on strong wording, 0.3 on cautious wording, else 0.5;
/// prices synthesized from the current close at ±3%/±5%.
fn heuristic_parse(body: &str, last_close: f64, warnings: &mut Vec<String>) -> ParsedAnalysis {
    let mut out = ParsedAnalysis::default();
    out.reason = body.chars().take(280).collect();
    out.action = action_from_text(body);

    let lower = body.to_lowercase();
    out.confidence = if contains_any(&lower, &["strongly", "强烈", "confident", "clear"]) {
        0.8
    } else if contains_any(&lower, &["cautious", "谨慎", "uncertain", "unclear"]) {
        0.3
    } else {
        0.5
    };

    match out.action {
        Action::Long => {
            out.stop_loss = Some(last_close * 0.97);
            out.take_profit = Some(last_close * 1.05);
        }
        Action::Short => {
            out.stop_loss = Some(last_close * 1.03);
            out.take_profit = Some(last_close * 0.95);
        }
        Action::Wait => {
            warnings.push("no actionable price levels (觀望)".to_string());
        }
    }

    out
}

/// Re-computes every risk-derived field from the market entry price, per
/// `spec.md` §4.7; always runs, even on heuristic-parsed results. The LLM's
/// own stop-loss/take-profit numbers are discarded in favor of this
/// computation — they only ever influenced `action` and `confidence`.
fn apply_risk_override(
    parsed: &mut ParsedAnalysis,
    warnings: &mut Vec<String>,
    entry: f64,
    indicators: &HashMap<String, Series>,
    config: &AdvisorConfig,
) {
    let Some(side) = parsed.action.position_side() else {
        return;
    };

    let atr_value = indicators.get("atr").and_then(|s| s.last()).filter(|v| !v.is_nan()).copied();
    let atr = atr_value.unwrap_or_else(|| risk::estimated_atr(entry));
    if atr_value.is_none() {
        warnings.push("ATR unavailable; using estimated ATR".to_string());
    }

    let computed_stop = risk::stop_loss(entry, atr, config.atr_multiplier, side);
    let computed_tp = risk::take_profit(entry, computed_stop, config.risk_reward_ratio, side);
    let leverage = risk::leverage(entry, computed_stop, config.max_leverage);
    let metrics = risk::risk_metrics(entry, computed_stop, computed_tp, config.account_balance, config.risk_percent, leverage);

    parsed.stop_loss = Some(computed_stop);
    parsed.take_profit = Some(computed_tp);
    parsed.leverage = Some(leverage);
    parsed.position_size = Some(metrics.position_size);
    parsed.margin_required = Some(metrics.margin_required);
    parsed.potential_loss = Some(metrics.potential_loss);
    parsed.potential_profit = Some(metrics.potential_profit);
    parsed.risk_reward = Some(metrics.risk_reward_ratio);
}

/// Parses a structured review; falls back to a minimal review carrying a
/// neutral score and the raw body as summary on JSON failure.
fn parse_review_body(body: &str, trade: &ClosedTrade) -> ReviewEntry {
    if let Some(json_str) = extract_json(body) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_str) {
            return ReviewEntry {
                symbol: trade.symbol.clone(),
                score: value.get("score").and_then(|v| v.as_f64()).unwrap_or(0.5),
                strengths: string_array(&value, "strengths"),
                weaknesses: string_array(&value, "weaknesses"),
                lessons: string_array(&value, "lessons"),
                improvements: string_array(&value, "improvements"),
                summary: value.get("summary").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                reviewed_at: Utc::now(),
            };
        }
    }

    ReviewEntry {
        symbol: trade.symbol.clone(),
        score: 0.5,
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        lessons: Vec::new(),
        improvements: Vec::new(),
        summary: body.chars().take(280).collect(),
        reviewed_at: Utc::now(),
    }
}

fn string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Estimated stop-loss/take-profit for a trade reviewed without a live
/// order book snapshot — `entry·0.95`/`entry·1.05`, the placeholder
/// `spec.md` §9 Open Question (i) names pending user-data-stream pairing.
pub fn placeholder_review_levels(entry: Decimal) -> (Decimal, Decimal) {
    (entry * Decimal::new(95, 2), entry * Decimal::new(105, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubChatClient {
        response: String,
    }

    #[async_trait]
    impl ChatClient for StubChatClient {
        async fn chat(&self, _m: &[ChatMessage], _t: f64, _mt: u32) -> Result<String, crate::domain::errors::AdvisorError> {
            Ok(self.response.clone())
        }
    }

    struct NullContextStore;

    #[async_trait]
    impl ContextStorePort for NullContextStore {
        async fn load_review_knowledge(&self) -> Vec<ReviewEntry> {
            Vec::new()
        }
        async fn add_review(&self, _entry: ReviewEntry) {}
        async fn load_optimized_strategies(&self) -> Vec<OptimizedStrategy> {
            Vec::new()
        }
        async fn add_strategy(&self, _entry: OptimizedStrategy) {}
        async fn load_learning_results(&self) -> Vec<LearningEntry> {
            Vec::new()
        }
        async fn add_learning(&self, _entry: LearningEntry) {}
        async fn reviewed_symbols_today(&self) -> HashMap<String, crate::domain::context::ReviewedSymbolRecord> {
            HashMap::new()
        }
        async fn mark_reviewed(&self, _symbol: String, _record: crate::domain::context::ReviewedSymbolRecord) {}
        async fn clear_all(&self) {}
    }

    fn test_config() -> AdvisorConfig {
        AdvisorConfig {
            provider_name: "test".to_string(),
            account_balance: 10000.0,
            risk_percent: 1.0,
            risk_reward_ratio: 2.0,
            atr_multiplier: 2.0,
            max_leverage: 10,
        }
    }

    #[tokio::test]
    async fn analyze_parses_fenced_json_and_applies_risk_override() {
        let response = r#"```json
        {"trend": "uptrend", "action": "做多", "confidence": 0.8, "stopLoss": 49800, "takeProfit": 50400, "reason": "strong momentum"}
        ```"#;
        let advisor = Advisor::new(
            Arc::new(StubChatClient { response: response.to_string() }),
            Arc::new(NullContextStore),
            PromptTemplates::load(std::path::Path::new("/nonexistent")),
            test_config(),
        );
        let mut indicators = HashMap::new();
        indicators.insert("atr".to_string(), vec![100.0]);
        let result = advisor.analyze("BTCUSDT", 50000.0, Some(49000.0), 1000.0, &indicators, "1h").await;
        assert_eq!(result.action, Action::Long);
        assert!(result.leverage.is_some());
        assert!(result.stop_loss.unwrap() < 50000.0);
    }

    #[tokio::test]
    async fn analyze_falls_back_to_heuristic_on_non_json() {
        let advisor = Advisor::new(
            Arc::new(StubChatClient { response: "I am cautious but leaning towards a long position here".to_string() }),
            Arc::new(NullContextStore),
            PromptTemplates::load(std::path::Path::new("/nonexistent")),
            test_config(),
        );
        let indicators = HashMap::new();
        let result = advisor.analyze("ETHUSDT", 3000.0, None, 500.0, &indicators, "1h").await;
        assert!(result.warnings.iter().any(|w| w.contains("not JSON")));
    }

    #[test]
    fn action_from_text_recognizes_chinese_and_english() {
        assert_eq!(action_from_text("做多 strongly"), Action::Long);
        assert_eq!(action_from_text("short position recommended"), Action::Short);
        assert_eq!(action_from_text("nothing clear"), Action::Wait);
    }
}
