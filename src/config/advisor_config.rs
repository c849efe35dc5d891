//! Advisor / LLM configuration (`spec.md` §4.6, §6).

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AdvisorEnvConfig {
    pub use_ai_analysis: bool,
    pub confidence_threshold: f64,
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_concurrent_analysis: usize,
}

impl AdvisorEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            use_ai_analysis: Self::parse_bool("USE_AI_ANALYSIS", true),
            confidence_threshold: Self::parse_f64("AI_CONFIDENCE_THRESHOLD", 0.6)?,
            provider: env::var("AI_PROVIDER").unwrap_or_else(|_| "mock".to_string()),
            base_url: env::var("AI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: env::var("AI_API_KEY").unwrap_or_default(),
            model: env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            max_concurrent_analysis: Self::parse_usize("MAX_CONCURRENT_ANALYSIS", 3)?,
        })
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<bool>().unwrap_or(default)
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<f64>().context(format!("failed to parse {key}"))
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<usize>().context(format!("failed to parse {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_mock_provider() {
        let config = AdvisorEnvConfig::from_env().unwrap();
        assert_eq!(config.provider, "mock");
        assert!(config.use_ai_analysis);
    }
}
