//! HMAC message signing and freshness checks.
//!
//! Signatures cover the exact transmitted byte sequence: the sender
//! serializes once and signs those bytes, the receiver verifies the raw
//! body before deserializing anything. Any failure rejects the message
//! entirely.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the sender's service identity.
pub const HDR_SERVICE: &str = "X-Service-Name";
/// Header carrying the base64 HMAC-SHA256 body signature.
pub const HDR_SIGNATURE: &str = "X-Signature";

/// Messages older (or newer) than this are rejected. This is a bounded
/// window, not a nonce scheme: replays inside the window succeed.
pub const FRESHNESS_WINDOW_SECS: i64 = 10;

#[derive(Debug, Error, PartialEq)]
pub enum SignError {
    #[error("message signature does not match")]
    BadSignature,

    #[error("signature is not valid base64")]
    MalformedSignature,

    #[error("message has expired")]
    Expired,

    #[error("missing or malformed Date header")]
    BadDate,

    #[error("unexpected peer service: {0}")]
    WrongService(String),
}

/// Shared-secret signer used by every network-facing participant.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// base64(HMAC-SHA256(secret, body))
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of `signature` against `body`.
    pub fn verify(&self, signature: &str, body: &[u8]) -> Result<(), SignError> {
        let provided = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| SignError::MalformedSignature)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if expected.as_slice().ct_eq(&provided).into() {
            Ok(())
        } else {
            Err(SignError::BadSignature)
        }
    }
}

/// Reject timestamps outside the freshness window, in either direction.
pub fn check_freshness(date: DateTime<Utc>) -> Result<(), SignError> {
    check_freshness_at(date, Utc::now())
}

fn check_freshness_at(date: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), SignError> {
    let skew = (now - date).abs();
    if skew > Duration::seconds(FRESHNESS_WINDOW_SECS) {
        return Err(SignError::Expired);
    }
    Ok(())
}

/// Verify the peer identity header before trusting any payload content.
pub fn check_service(expected: &str, got: &str) -> Result<(), SignError> {
    if expected == got {
        Ok(())
    } else {
        Err(SignError::WrongService(got.to_string()))
    }
}

/// RFC 1123 `Date` header value for now.
pub fn httpdate(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an RFC 1123 `Date` header.
pub fn parse_httpdate(s: &str) -> Result<DateTime<Utc>, SignError> {
    DateTime::parse_from_rfc2822(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SignError::BadDate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = Signer::new("shared-secret");
        let body = br#"{"UserId":7001,"Command":"assign-session","Data":"{}"}"#;
        let sig = signer.sign(body);
        assert!(signer.verify(&sig, body).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signer = Signer::new("shared-secret");
        let sig = signer.sign(b"original");
        assert_eq!(signer.verify(&sig, b"tampered"), Err(SignError::BadSignature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let sig = Signer::new("secret-a").sign(body);
        assert_eq!(
            Signer::new("secret-b").verify(&sig, body),
            Err(SignError::BadSignature)
        );
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let signer = Signer::new("shared-secret");
        assert_eq!(
            signer.verify("not base64!!", b"body"),
            Err(SignError::MalformedSignature)
        );
    }

    #[test]
    fn test_stale_date_rejected_despite_valid_signature() {
        // an 11 second old timestamp fails even though the signature checks out
        let signer = Signer::new("shared-secret");
        let body = b"body";
        let sig = signer.sign(body);
        assert!(signer.verify(&sig, body).is_ok());

        let now = Utc::now();
        let stale = now - Duration::seconds(11);
        assert_eq!(check_freshness_at(stale, now), Err(SignError::Expired));
    }

    #[test]
    fn test_freshness_window_boundaries() {
        let now = Utc::now();
        assert!(check_freshness_at(now - Duration::seconds(9), now).is_ok());
        assert!(check_freshness_at(now - Duration::seconds(10), now).is_ok());
        // a timestamp from the future is just as stale
        assert_eq!(
            check_freshness_at(now + Duration::seconds(11), now),
            Err(SignError::Expired)
        );
    }

    #[test]
    fn test_httpdate_roundtrip() {
        let t = parse_httpdate("Tue, 10 Nov 2009 23:00:00 GMT").unwrap();
        assert_eq!(httpdate(t), "Tue, 10 Nov 2009 23:00:00 GMT");
        assert_eq!(parse_httpdate("yesterday"), Err(SignError::BadDate));
    }

    #[test]
    fn test_service_name_check() {
        assert!(check_service("sixtun", "sixtun").is_ok());
        assert_eq!(
            check_service("sixtun", "intruder"),
            Err(SignError::WrongService("intruder".to_string()))
        );
    }
}
