//! HMAC-SHA256 verification of inbound webhook bodies.
//!
//! Providers sign the raw request body with the shared `WEBHOOK_SECRET` and send
//! `sha256=<hex>` in either `x-webhook-secret` or `x-hub-signature-256`. Some
//! providers omit the `sha256=` prefix; it is added back before comparing.

use std::fmt;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

pub const SIGNATURE_HEADERS: [&str; 2] = ["x-webhook-secret", "x-hub-signature-256"];
pub const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing webhook signature header")]
    MissingSignature,
    #[error("webhook signature mismatch")]
    InvalidSignature,
}

impl SignatureError {
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::MissingSignature => "missing_signature",
            SignatureError::InvalidSignature => "invalid_signature",
        }
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enforced", &self.is_enforced())
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into().into_bytes()),
        }
    }

    /// Accepts every delivery. Only built when configuration explicitly allows
    /// unsigned webhooks.
    pub fn unsigned() -> Self {
        Self { secret: None }
    }

    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        let provided = SIGNATURE_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        });
        self.verify_value(provided, body)
    }

    pub fn verify_value(&self, provided: Option<&str>, body: &[u8]) -> Result<(), SignatureError> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("webhook accepted without signature check; WEBHOOK_SECRET is not configured");
            return Ok(());
        };
        let provided = provided
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(SignatureError::MissingSignature)?;
        let provided = normalize_signature(provided);
        let expected = sign(secret, body);
        if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(SignatureError::InvalidSignature)
        }
    }
}

/// Signature a provider is expected to send for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
        }
        // HMAC takes keys of any length; an empty signature never matches.
        Err(_) => String::new(),
    }
}

fn normalize_signature(value: &str) -> String {
    if value.starts_with(SIGNATURE_PREFIX) {
        value.to_string()
    } else {
        format!("{}{}", SIGNATURE_PREFIX, value)
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.ct_eq(right).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";
    const BODY: &[u8] = br#"{"from":"+233244000111","text":"Hi"}"#;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_correct_signature_under_either_header() {
        let verifier = SignatureVerifier::new(SECRET);
        let signature = sign(SECRET.as_bytes(), BODY);
        assert!(signature.starts_with("sha256="));
        for name in SIGNATURE_HEADERS {
            assert_eq!(verifier.verify(&headers_with(name, &signature), BODY), Ok(()));
        }
    }

    #[test]
    fn accepts_signature_without_prefix() {
        let verifier = SignatureVerifier::new(SECRET);
        let signature = sign(SECRET.as_bytes(), BODY);
        let bare = signature.trim_start_matches(SIGNATURE_PREFIX);
        assert_eq!(
            verifier.verify(&headers_with("x-hub-signature-256", bare), BODY),
            Ok(())
        );
    }

    #[test]
    fn rejects_missing_header() {
        let verifier = SignatureVerifier::new(SECRET);
        assert_eq!(
            verifier.verify(&HeaderMap::new(), BODY),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verifier.verify(&headers_with("x-webhook-secret", "  "), BODY),
            Err(SignatureError::MissingSignature)
        );
    }

    #[test]
    fn rejects_every_single_bit_mutation_of_body() {
        let verifier = SignatureVerifier::new(SECRET);
        let signature = sign(SECRET.as_bytes(), BODY);
        for byte in 0..BODY.len() {
            for bit in 0..8 {
                let mut mutated = BODY.to_vec();
                mutated[byte] ^= 1 << bit;
                assert_eq!(
                    verifier.verify_value(Some(&signature), &mutated),
                    Err(SignatureError::InvalidSignature),
                    "byte {} bit {}",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn rejects_every_single_bit_mutation_of_signature() {
        let verifier = SignatureVerifier::new(SECRET);
        let signature = sign(SECRET.as_bytes(), BODY).into_bytes();
        for byte in SIGNATURE_PREFIX.len()..signature.len() {
            for bit in 0..8 {
                let mut mutated = signature.clone();
                mutated[byte] ^= 1 << bit;
                let mutated = String::from_utf8_lossy(&mutated).into_owned();
                assert!(
                    verifier.verify_value(Some(&mutated), BODY).is_err(),
                    "byte {} bit {}",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn rejects_length_mismatch() {
        let verifier = SignatureVerifier::new(SECRET);
        let mut signature = sign(SECRET.as_bytes(), BODY);
        signature.push('0');
        assert_eq!(
            verifier.verify_value(Some(&signature), BODY),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_signature_from_other_secret() {
        let verifier = SignatureVerifier::new(SECRET);
        let signature = sign(b"other-secret", BODY);
        assert_eq!(
            verifier.verify_value(Some(&signature), BODY),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn unsigned_verifier_accepts_anything() {
        let verifier = SignatureVerifier::unsigned();
        assert!(!verifier.is_enforced());
        assert_eq!(verifier.verify(&HeaderMap::new(), BODY), Ok(()));
        assert_eq!(verifier.verify_value(Some("sha256=bogus"), BODY), Ok(()));
    }

    #[test]
    fn debug_output_hides_secret() {
        let verifier = SignatureVerifier::new(SECRET);
        assert!(!format!("{:?}", verifier).contains(SECRET));
    }
}
