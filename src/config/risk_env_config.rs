//! Risk-calculator environment configuration (`spec.md` §4.7, §6).

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub account_balance: f64,
    pub risk_percent: f64,
    pub risk_reward_ratio: f64,
    pub atr_multiplier: f64,
    pub max_leverage: u32,
    pub max_loss_per_trade: f64,
    pub max_position_size: f64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            account_balance: Self::parse_f64("ACCOUNT_BALANCE", 10000.0)?,
            risk_percent: Self::parse_f64("RISK_PERCENT", 1.0)?,
            risk_reward_ratio: Self::parse_f64("RISK_REWARD_RATIO", 2.0)?,
            atr_multiplier: Self::parse_f64("ATR_MULTIPLIER", 2.0)?,
            max_leverage: Self::parse_u32("MAX_LEVERAGE", 10)?,
            max_loss_per_trade: Self::parse_f64("MAX_LOSS_PER_TRADE", 0.02)?,
            max_position_size: Self::parse_f64("MAX_POSITION_SIZE", 0.3)?,
        })
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<f64>().context(format!("failed to parse {key}"))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<u32>().context(format!("failed to parse {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_config_defaults() {
        let config = RiskEnvConfig::from_env().unwrap();
        assert_eq!(config.max_leverage, 10);
        assert_eq!(config.risk_reward_ratio, 2.0);
    }
}
