//! Prompt template loading and safe placeholder substitution (`spec.md` §4.6).
//! The actual on-disk layout (`prompts/{kind}/{system,user}.txt` or
//! `prompts/prompts.json`) is treated as an external collaborator's format;
//! this module accepts either and falls back to built-in defaults so the
//! advisor works out of the box with no prompt files present.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Analysis,
    Learning,
    Review,
}

impl PromptKind {
    fn as_str(self) -> &'static str {
        match self {
            PromptKind::Analysis => "analysis",
            PromptKind::Learning => "learning",
            PromptKind::Review => "review",
        }
    }

    const ALL: [PromptKind; 3] = [PromptKind::Analysis, PromptKind::Learning, PromptKind::Review];
}

#[derive(Debug, Clone)]
pub struct PromptSet {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct PromptsJsonEntry {
    system: String,
    user: String,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
}

pub struct PromptTemplates {
    sets: HashMap<&'static str, PromptSet>,
}

impl PromptTemplates {
    /// Tries `prompts_dir/prompts.json`, then `prompts_dir/{kind}/{system,user}.txt`
    /// per kind, then built-in defaults for any kind still missing.
    pub fn load(prompts_dir: &Path) -> Self {
        let mut sets = HashMap::new();

        let json_path = prompts_dir.join("prompts.json");
        if let Ok(bytes) = std::fs::read(&json_path) {
            match serde_json::from_slice::<HashMap<String, PromptsJsonEntry>>(&bytes) {
                Ok(parsed) => {
                    for kind in PromptKind::ALL {
                        if let Some(entry) = parsed.get(kind.as_str()) {
                            sets.insert(
                                kind.as_str(),
                                PromptSet {
                                    system: entry.system.clone(),
                                    user: entry.user.clone(),
                                    temperature: entry.temperature.unwrap_or(0.3),
                                    max_tokens: entry.max_tokens.unwrap_or(2000),
                                },
                            );
                        }
                    }
                }
                Err(e) => warn!("failed to parse prompts.json, falling back: {}", e),
            }
        }

        for kind in PromptKind::ALL {
            if sets.contains_key(kind.as_str()) {
                continue;
            }
            let system_path = prompts_dir.join(kind.as_str()).join("system.txt");
            let user_path = prompts_dir.join(kind.as_str()).join("user.txt");
            if let (Ok(system), Ok(user)) = (std::fs::read_to_string(&system_path), std::fs::read_to_string(&user_path)) {
                sets.insert(kind.as_str(), PromptSet { system, user, temperature: 0.3, max_tokens: 2000 });
            }
        }

        for kind in PromptKind::ALL {
            sets.entry(kind.as_str()).or_insert_with(|| default_prompt_set(kind));
        }

        Self { sets }
    }

    pub fn get(&self, kind: PromptKind) -> &PromptSet {
        self.sets.get(kind.as_str()).expect("all kinds populated at load time")
    }
}

fn default_prompt_set(kind: PromptKind) -> PromptSet {
    match kind {
        PromptKind::Analysis => PromptSet {
            system: "You are a disciplined cryptocurrency perpetual-futures trading advisor. \
                Respond with a single JSON object containing trend, action, confidence, entry, \
                stopLoss, takeProfit, support, resistance, reason.".to_string(),
            user: "Symbol: {{symbol}}\nTimeframe: {{timeframe}}\n\nMarket data:\n{{market_data}}\n\n\
                Indicators:\n{{indicator_block}}\n\n{{review_insights}}\n\nAnalyze and respond in JSON.".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
        },
        PromptKind::Learning => PromptSet {
            system: "You distill a short, reusable trading lesson from recent market behavior.".to_string(),
            user: "Topic: {{topic}}\n\nSummarize the lesson in two or three sentences.".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
        },
        PromptKind::Review => PromptSet {
            system: "You review a completed trade and produce a structured assessment with a score, \
                strengths, weaknesses, lessons, improvements, and a one-paragraph summary, as JSON.".to_string(),
            user: "Trade: {{trade_summary}}\n\nReview this trade and respond in JSON.".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
        },
    }
}

/// Replaces `{{key}}` occurrences found in `vars`; any other `{{...}}`
/// placeholder is left untouched (safe substitution, `spec.md` §4.6).
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            output.push_str(&rest[start..]);
            return output;
        };
        let key = after_open[..end].trim();
        match vars.get(key) {
            Some(value) => output.push_str(value),
            None => {
                output.push_str("{{");
                output.push_str(key);
                output.push_str("}}");
            }
        }
        rest = &after_open[end + 2..];
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_no_files_present() {
        let templates = PromptTemplates::load(Path::new("/nonexistent/path/unlikely"));
        let analysis = templates.get(PromptKind::Analysis);
        assert!(analysis.user.contains("{{symbol}}"));
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("symbol".to_string(), "BTCUSDT".to_string());
        let out = render("Symbol: {{symbol}}, unknown: {{mystery}}", &vars);
        assert_eq!(out, "Symbol: BTCUSDT, unknown: {{mystery}}");
    }

    #[test]
    fn render_preserves_unterminated_placeholder() {
        let vars = HashMap::new();
        let out = render("broken {{", &vars);
        assert_eq!(out, "broken {{");
    }
}
