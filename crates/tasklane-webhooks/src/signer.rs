//! HMAC-SHA256 payload signing.
//!
//! Subscriptions with a secret get an `X-Tasklane-Signature` header computed
//! over the exact body bytes transmitted. The envelope must be finalized
//! before signing; the signature is reused verbatim on every retry of a
//! delivery because the bytes never change.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix tagging the digest algorithm in the signature header.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Signing and verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The secret key was rejected by the MAC implementation.
    #[error("invalid signing secret")]
    InvalidSecret,

    /// The signature header does not carry a `sha256=` tagged value.
    #[error("invalid signature format: {0}")]
    InvalidFormat(String),
}

/// Computes the signature header value for a finalized body.
///
/// Returns `"sha256=" + lowercase_hex(HMAC_SHA256(secret, body))`.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidSecret`] if the MAC cannot be keyed with
/// the given secret.
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();

    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Verifies a signature header against a received body.
///
/// Receiver-side counterpart of [`signature_header`], used by tests and by
/// embedding code that consumes Tasklane webhooks. Comparison is
/// constant-time.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidFormat`] if the header is not
/// `sha256=`-tagged, or [`SignatureError::InvalidSecret`] if the secret is
/// unusable.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header_value: &str,
) -> Result<bool, SignatureError> {
    let presented = header_value
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| SignatureError::InvalidFormat(header_value.to_string()))?;

    let expected = signature_header(secret, body)?;
    let expected_hex = &expected[SIGNATURE_PREFIX.len()..];

    Ok(constant_time_eq(presented.as_bytes(), expected_hex.as_bytes()))
}

/// Constant-time byte comparison to avoid leaking the expected signature
/// through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
