//! Persistence and learning/review post-hook configuration (`spec.md` §4.5, §4.9, §6).

use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub save_analysis_results: bool,
    pub analysis_results_dir: String,
    pub enable_auto_learning: bool,
    pub enable_auto_review: bool,
    pub auto_learning_topics: Vec<String>,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        let topics_str = env::var("AUTO_LEARNING_TOPICS").unwrap_or_default();
        let auto_learning_topics = topics_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            save_analysis_results: Self::parse_bool("SAVE_ANALYSIS_RESULTS", false),
            analysis_results_dir: env::var("ANALYSIS_RESULTS_DIR").unwrap_or_else(|_| "data".to_string()),
            enable_auto_learning: Self::parse_bool("ENABLE_AUTO_LEARNING", true),
            enable_auto_review: Self::parse_bool("ENABLE_AUTO_REVIEW", true),
            auto_learning_topics,
        })
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<bool>().unwrap_or(default)
    }
}
