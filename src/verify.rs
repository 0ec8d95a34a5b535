//! Webhook authenticity and freshness checks.
//!
//! Signature verification runs before any other work: HMAC over the raw body,
//! hex-decoded header value, constant-time comparison via `Mac::verify_slice`.
//! Replay protection bounds the absolute skew between the provider's timestamp
//! header and the gateway clock.

use crate::config::SignatureAlgorithm;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("invalid hex encoding in signature")]
    MalformedSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("missing timestamp header")]
    MissingTimestamp,
    #[error("unparseable timestamp: {0}")]
    MalformedTimestamp(String),
}

/// Verify an HMAC signature over the raw request body.
///
/// `prefix` is the provider's header decoration (e.g. `sha256=`); when set it
/// is stripped before hex decoding, and its absence in the header is tolerated
/// since some providers send the bare digest.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    prefix: Option<&str>,
    secret: &str,
    body: &[u8],
    header_value: &str,
) -> Result<(), VerifyError> {
    let hex_sig = match prefix {
        Some(p) => header_value.strip_prefix(p).unwrap_or(header_value),
        None => header_value,
    };
    let sig_bytes = hex::decode(hex_sig).map_err(|_| VerifyError::MalformedSignature)?;

    match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| VerifyError::SignatureMismatch)?;
            mac.update(body);
            mac.verify_slice(&sig_bytes)
                .map_err(|_| VerifyError::SignatureMismatch)
        }
        SignatureAlgorithm::HmacSha1 => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .map_err(|_| VerifyError::SignatureMismatch)?;
            mac.update(body);
            mac.verify_slice(&sig_bytes)
                .map_err(|_| VerifyError::SignatureMismatch)
        }
    }
}

/// Compute the signature a provider would send, hex-encoded without prefix.
/// Used by tests and by fixture tooling.
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let mut mac =
                HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::HmacSha1 => {
            let mut mac =
                HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Parse a provider timestamp header: unix seconds or RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, VerifyError> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| VerifyError::MalformedTimestamp(value.to_string()));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| VerifyError::MalformedTimestamp(value.to_string()))
}

/// True when `timestamp` is within `window_seconds` of `now` in either
/// direction. Stale deliveries are dropped terminally (the provider gets a
/// success so it stops retrying), so this is a freshness gate, not an error.
pub fn within_replay_window(timestamp: DateTime<Utc>, now: DateTime<Utc>, window_seconds: i64) -> bool {
    let skew = (now - timestamp).num_seconds().abs();
    skew <= Duration::seconds(window_seconds).num_seconds()
}
