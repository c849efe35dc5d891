//! Symbol parsing and smart-completion (C2).

use serde::{Deserialize, Serialize};

/// Ordered so that a longer quote (`USDT`) is tried before a shorter one that
/// would otherwise steal its prefix (`USD`), matching `spec.md` §4.2.
pub const QUOTE_CURRENCIES: &[&str] = &[
    "USDT", "USDC", "BUSD", "USD", "TUSD", "BTC", "ETH", "BNB", "EUR", "GBP", "JPY", "CNY",
];

const SEPARATORS: &[char] = &['/', '-', '_'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    pub raw: String,
    pub base: String,
    pub quote: String,
}

impl SymbolDescriptor {
    /// Normalized exchange form, e.g. `BTCUSDT`.
    pub fn normalized(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SymbolParseError {
    #[error("empty symbol")]
    Empty,
    #[error("could not determine quote currency for '{0}'")]
    UnknownQuote(String),
}

/// Parses a raw symbol string into base/quote. Separator-based first
/// (`/`, `-`, `_`), then greedy suffix match against [`QUOTE_CURRENCIES`].
pub fn parse_symbol(raw: &str) -> Result<SymbolDescriptor, SymbolParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SymbolParseError::Empty);
    }
    let upper = trimmed.to_uppercase();

    if let Some(sep) = upper.chars().find(|c| SEPARATORS.contains(c)) {
        let mut parts = upper.splitn(2, sep);
        let base = parts.next().unwrap_or_default().to_string();
        let quote = parts.next().unwrap_or_default().to_string();
        if base.is_empty() || quote.is_empty() {
            return Err(SymbolParseError::UnknownQuote(raw.to_string()));
        }
        return Ok(SymbolDescriptor {
            raw: raw.to_string(),
            base,
            quote,
        });
    }

    for quote in QUOTE_CURRENCIES {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            let base = upper[..upper.len() - quote.len()].to_string();
            return Ok(SymbolDescriptor {
                raw: raw.to_string(),
                base,
                quote: quote.to_string(),
            });
        }
    }

    Err(SymbolParseError::UnknownQuote(raw.to_string()))
}

/// Smart-expands a bare base (e.g. `btc`) to `BASE+defaultQuote` when `raw`
/// does not already parse as a full pair.
pub fn normalize_or_complete(raw: &str, default_quote: &str) -> String {
    match parse_symbol(raw) {
        Ok(desc) => desc.normalized(),
        Err(_) => format!("{}{}", raw.trim().to_uppercase(), default_quote),
    }
}

/// `smartSearch(input, universe, defaultQuote)`: exact match, then
/// `base=input & quote=defaultQuote`, then any pair containing `input`.
pub fn smart_search<'a>(input: &str, universe: &'a [String], default_quote: &str) -> Vec<&'a str> {
    let needle = input.trim().to_uppercase();

    if let Some(exact) = universe.iter().find(|s| s.as_str() == needle) {
        return vec![exact.as_str()];
    }

    let candidate = format!("{needle}{default_quote}");
    if let Some(hit) = universe.iter().find(|s| s.as_str() == candidate) {
        return vec![hit.as_str()];
    }

    universe
        .iter()
        .filter(|s| s.contains(&needle))
        .map(|s| s.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_separator_forms() {
        for raw in ["BTC/USDT", "btc-usdt", "BTC_USDT"] {
            let d = parse_symbol(raw).unwrap();
            assert_eq!(d.base, "BTC");
            assert_eq!(d.quote, "USDT");
        }
    }

    #[test]
    fn greedy_suffix_prefers_longer_quote() {
        let d = parse_symbol("BTCUSDT").unwrap();
        assert_eq!(d.base, "BTC");
        assert_eq!(d.quote, "USDT");
    }

    #[test]
    fn distinguishes_usd_from_usdt() {
        let d = parse_symbol("BTCUSD").unwrap();
        assert_eq!(d.base, "BTC");
        assert_eq!(d.quote, "USD");
    }

    #[test]
    fn round_trip_identity() {
        let d = parse_symbol("ETHUSDT").unwrap();
        let normalized = d.normalized();
        let reparsed = parse_symbol(&normalized).unwrap();
        assert_eq!(reparsed.normalized(), normalized);
    }

    #[test]
    fn rejects_unmatched_quote() {
        assert!(parse_symbol("XYZZY").is_err());
        assert!(parse_symbol("").is_err());
    }

    #[test]
    fn smart_complete_bare_base() {
        assert_eq!(normalize_or_complete("btc", "USDT"), "BTCUSDT");
    }

    #[test]
    fn smart_search_priority_order() {
        let universe = vec![
            "BTCUSDT".to_string(),
            "ETHBTCUSDT".to_string(),
            "BTCBUSD".to_string(),
        ];
        let hits = smart_search("BTCUSDT", &universe, "USDT");
        assert_eq!(hits, vec!["BTCUSDT"]);

        let universe2 = vec!["BTCBUSD".to_string(), "BTCUSDT".to_string()];
        let hits2 = smart_search("BTC", &universe2, "USDT");
        assert_eq!(hits2, vec!["BTCUSDT"]);

        let universe3 = vec!["ETHBTCUSDT".to_string(), "BTCBUSD".to_string()];
        let hits3 = smart_search("BTC", &universe3, "XYZ");
        assert_eq!(hits3.len(), 2);
    }
}
