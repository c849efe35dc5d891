//! HTTP client construction and canonical query-string building.
//!
//! The query string built here is the single source of truth: it is signed
//! and then sent unchanged. Never rebuild the query through a second
//! encoder (e.g. `reqwest`'s own `.query()`) — two independent encoders can
//! silently disagree (space vs `+` vs `%20`) and cause opaque auth failures,
//! a recurring failure class `spec.md` §9 calls out explicitly.

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    pub fn create_client(timeout: Duration) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Builds the canonical query string `spec.md` §4.3 describes: parameters
/// lexicographically sorted by key, booleans lower-cased, numbers already
/// pre-rendered by the caller (up to 8 significant digits, no scientific
/// notation — see [`format_decimal`]).
pub fn build_canonical_query(params: &[(String, String)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Renders a `Decimal` with up to 8 significant digits and no scientific
/// notation, suitable for a signed request parameter.
pub fn format_decimal(value: rust_decimal::Decimal) -> String {
    let rounded = value.round_dp(8);
    rounded.normalize().to_string()
}

fn urlencode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sorts_params_lexicographically() {
        let params = vec![
            ("symbol".to_string(), "BTCUSDT".to_string()),
            ("apple".to_string(), "1".to_string()),
        ];
        let query = build_canonical_query(&params);
        assert_eq!(query, "apple=1&symbol=BTCUSDT");
    }

    #[test]
    fn query_is_deterministic_across_calls() {
        let params = vec![
            ("timestamp".to_string(), "123".to_string()),
            ("symbol".to_string(), "BTCUSDT".to_string()),
        ];
        let q1 = build_canonical_query(&params);
        let q2 = build_canonical_query(&params);
        assert_eq!(q1, q2);
    }

    #[test]
    fn mutating_a_param_changes_the_query() {
        let base = vec![("symbol".to_string(), "BTCUSDT".to_string())];
        let mutated = vec![("symbol".to_string(), "ETHUSDT".to_string())];
        assert_ne!(build_canonical_query(&base), build_canonical_query(&mutated));
    }

    #[test]
    fn decimal_formatting_has_no_scientific_notation() {
        let formatted = format_decimal(dec!(0.000001234567891));
        assert!(!formatted.contains('e'));
        assert!(!formatted.contains('E'));
    }
}
