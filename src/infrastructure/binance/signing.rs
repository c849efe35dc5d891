//! Request signing for Binance USDⓈ-M futures (`spec.md` §4.3, §6).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `HMAC_SHA256(secret, canonicalQuery)`, hex-encoded.
pub fn sign(secret: &str, canonical_query: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical_query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_64_hex_chars() {
        let sig = sign("secret", "symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign("secret", "symbol=BTCUSDT");
        let b = sign("secret", "symbol=BTCUSDT");
        assert_eq!(a, b);
    }

    #[test]
    fn mutated_query_changes_signature() {
        let a = sign("secret", "symbol=BTCUSDT");
        let b = sign("secret", "symbol=ETHUSDT");
        assert_ne!(a, b);
    }

    #[test]
    fn different_secret_changes_signature() {
        let a = sign("secret-one", "symbol=BTCUSDT");
        let b = sign("secret-two", "symbol=BTCUSDT");
        assert_ne!(a, b);
    }
}
