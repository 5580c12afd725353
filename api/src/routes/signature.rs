//! Webhook signature verification.
//!
//! The signature header must be `sha256=<64 hex>`; the MAC is HMAC-SHA-256
//! over the raw request body. Comparison goes through `Mac::verify_slice`,
//! which is constant time; a single flipped byte in body or signature
//! rejects.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify `sha256=<hex>` against the raw body.
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_mac) = header.strip_prefix("sha256=") else {
        return false;
    };
    if hex_mac.len() != 64 || !hex_mac.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let Ok(expected) = hex::decode(hex_mac) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Sign a body for tests and outbound calls.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let body = br#"{"a":1}"#;
        let header = sign("s", body);
        assert!(verify("s", body, &header));
    }

    #[test]
    fn any_single_flip_rejects() {
        let body = br#"{"a":1}"#;
        let header = sign("s", body);

        // Flip one byte of the body.
        let mut tampered = body.to_vec();
        tampered[3] ^= 0x01;
        assert!(!verify("s", &tampered, &header));

        // Flip one hex digit of the signature.
        let mut chars: Vec<char> = header.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered_header: String = chars.into_iter().collect();
        assert!(!verify("s", body, &tampered_header));
    }

    #[test]
    fn malformed_headers_reject() {
        let body = b"x";
        assert!(!verify("s", body, "deadbeef"));
        assert!(!verify("s", body, "sha256=deadbeef"));
        assert!(!verify("s", body, "sha1=0000"));
        assert!(!verify("s", body, &format!("sha256={}", "z".repeat(64))));
    }

    #[test]
    fn wrong_secret_rejects() {
        let body = br#"{"a":1}"#;
        let header = sign("s", body);
        assert!(!verify("other", body, &header));
    }
}
