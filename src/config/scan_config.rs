//! Universe selection and candle-window configuration (`spec.md` §4.1, §4.9, §6).

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineType {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Hot,
    Volume,
    Gainers,
    Losers,
}

impl std::str::FromStr for ScanType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "volume" => Ok(Self::Volume),
            "gainers" => Ok(Self::Gainers),
            "losers" => Ok(Self::Losers),
            _ => anyhow::bail!("unknown scan type: {}", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanEnvConfig {
    pub timeframe: String,
    pub lookback: usize,
    pub kline_type: KlineType,
    pub custom_symbols: Vec<String>,
    pub scan_types: Vec<ScanType>,
    pub scan_top_n: usize,
    pub default_quote: String,
    pub auto_scan: bool,
}

impl ScanEnvConfig {
    pub fn from_env() -> Result<Self> {
        let kline_type_str = env::var("KLINE_TYPE").unwrap_or_else(|_| "closed".to_string());
        let kline_type = match kline_type_str.as_str() {
            "open" => KlineType::Open,
            _ => KlineType::Closed,
        };

        let custom_symbols: Vec<String> = env::var("CUSTOM_SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let scan_types_str = env::var("SCAN_TYPES").unwrap_or_else(|_| "hot,volume,gainers,losers".to_string());
        let scan_types: Vec<ScanType> = scan_types_str
            .split(',')
            .filter_map(|s| s.trim().parse::<ScanType>().ok())
            .collect();

        Ok(Self {
            timeframe: env::var("TIMEFRAME").unwrap_or_else(|_| "1h".to_string()),
            lookback: Self::parse_usize("LOOKBACK", 100)?,
            kline_type,
            custom_symbols,
            scan_types,
            scan_top_n: Self::parse_usize("SCAN_TOP_N", 20)?,
            default_quote: env::var("DEFAULT_QUOTE").unwrap_or_else(|_| "USDT".to_string()),
            auto_scan: Self::parse_bool("AUTO_SCAN", false),
        })
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<usize>().context(format!("failed to parse {key}"))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key).unwrap_or_else(|_| default.to_string()).parse::<bool>().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_scan_types() {
        let config = ScanEnvConfig::from_env().unwrap();
        assert_eq!(config.scan_types.len(), 4);
        assert_eq!(config.kline_type, KlineType::Closed);
    }
}
