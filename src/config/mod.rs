//! Environment-sourced configuration, composed from per-concern sub-configs
//! the way the teacher's `Config` aggregates `*EnvConfig` structs.

mod advisor_config;
mod broker_config;
mod observability_config;
mod risk_env_config;
mod scan_config;

pub use advisor_config::AdvisorEnvConfig;
pub use broker_config::{BrokerEnvConfig, TradingEnvironment};
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use scan_config::{KlineType, ScanEnvConfig, ScanType};

use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub use_proxy: bool,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self {
            use_proxy: env::var("USE_PROXY").unwrap_or_else(|_| "false".to_string()).parse::<bool>().unwrap_or(false),
            host: env::var("PROXY_HOST").unwrap_or_default(),
            port: env::var("PROXY_PORT").unwrap_or_else(|_| "0".to_string()).parse::<u16>().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEnvConfig,
    pub scan: ScanEnvConfig,
    pub advisor: AdvisorEnvConfig,
    pub risk: RiskEnvConfig,
    pub observability: ObservabilityEnvConfig,
    pub proxy: ProxyConfig,
    /// Raw `INDICATOR_<name>=p1,p2,...` grammar string the indicator engine
    /// parses, collected from every `INDICATOR_*` environment variable.
    pub indicator_spec: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker: BrokerEnvConfig::from_env()?,
            scan: ScanEnvConfig::from_env()?,
            advisor: AdvisorEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env()?,
            proxy: ProxyConfig::from_env(),
            indicator_spec: collect_indicator_spec(),
        })
    }
}

/// Every `INDICATOR_<NAME>=p1,p2,...` env var becomes a `name=p1,p2,...`
/// entry in the grammar `IndicatorConfig::parse` understands; entries
/// beginning with `#` are passed through and dropped by the parser.
fn collect_indicator_spec() -> String {
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("INDICATOR_").map(|name| format!("{}={}", name.to_lowercase(), value))
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_succeeds_with_no_vars_set() {
        let config = Config::from_env();
        assert!(config.is_ok());
    }
}
