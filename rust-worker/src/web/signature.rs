//! Submission signature verification.
//!
//! Job submissions are signed by the enclosing application with a
//! shared key: `signature = HMAC-SHA256(key, timestamp + token)`, where
//! `timestamp` is Unix epoch seconds and `token` is a random nonce.
//! The timestamp is bounded by a max age to stop replays.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Verify a submission signature.
///
/// # Arguments
///
/// * `signing_key` - The shared submission signing key
/// * `timestamp` - The 'timestamp' field from the submission
/// * `token` - The 'token' field from the submission
/// * `signature` - The 'signature' field from the submission
/// * `max_age_seconds` - Maximum allowed age of the timestamp
///
/// # Returns
///
/// `true` if the signature is valid and not stale, `false` otherwise.
pub fn verify_submission_signature(
    signing_key: &str,
    timestamp: &str,
    token: &str,
    signature: &str,
    max_age_seconds: u64,
) -> bool {
    // Check for empty inputs
    if signing_key.is_empty() || timestamp.is_empty() || token.is_empty() || signature.is_empty() {
        warn!(
            has_signing_key = !signing_key.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_token = !token.is_empty(),
            has_signature = !signature.is_empty(),
            "submission_signature_missing_fields"
        );
        return false;
    }

    // Verify timestamp is not stale (prevents replay attacks)
    let submitted_at: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "submission_signature_invalid_timestamp");
            return false;
        }
    };

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let age = current_time.abs_diff(submitted_at);

    if age > max_age_seconds {
        warn!(
            submitted_at = submitted_at,
            current_time = current_time,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "submission_signature_stale"
        );
        return false;
    }

    // Compute expected signature: HMAC-SHA256(signing_key, timestamp + token)
    let mut mac = match HmacSha256::new_from_slice(signing_key.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("submission_signature_invalid_key");
            return false;
        }
    };

    mac.update(format!("{}{}", timestamp, token).as_bytes());

    let expected_signature = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected_signature, signature);

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "submission_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if submission signature verification is enabled.
pub fn is_signature_verification_enabled(signing_key: &Option<String>) -> bool {
    signing_key
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}
