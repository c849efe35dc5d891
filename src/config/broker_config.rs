//! Exchange/broker environment configuration (`spec.md` §6).

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingEnvironment {
    Observe,
    Testnet,
    Mainnet,
}

impl std::str::FromStr for TradingEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observe" => Ok(Self::Observe),
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            _ => anyhow::bail!("invalid TRADING_ENVIRONMENT: {}. must be observe, testnet or mainnet", s),
        }
    }
}

impl TradingEnvironment {
    pub fn is_observe(self) -> bool {
        self == Self::Observe
    }
}

#[derive(Debug, Clone)]
pub struct BrokerEnvConfig {
    pub exchange_name: String,
    pub environment: TradingEnvironment,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
const MAINNET_BASE_URL: &str = "https://fapi.binance.com";

impl BrokerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let exchange_name = env::var("EXCHANGE_NAME").unwrap_or_else(|_| "binance".to_string());
        let environment_str = env::var("TRADING_ENVIRONMENT").unwrap_or_else(|_| "observe".to_string());
        let environment = environment_str
            .parse::<TradingEnvironment>()
            .context("failed to parse TRADING_ENVIRONMENT")?;

        let base_url = match environment {
            TradingEnvironment::Mainnet => MAINNET_BASE_URL.to_string(),
            _ => TESTNET_BASE_URL.to_string(),
        };

        Ok(Self {
            exchange_name,
            environment,
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: env::var("BINANCE_API_SECRET").unwrap_or_default(),
            base_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_observe_mode() {
        let config = BrokerEnvConfig::from_env().unwrap();
        assert_eq!(config.environment, TradingEnvironment::Observe);
    }
}
