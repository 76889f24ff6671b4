//! Interledger PREIMAGE-SHA-256 crypto-conditions.
//!
//! A condition is the base64url (unpadded) SHA-256 digest of a 32-byte
//! preimage; the fulfilment is the base64url preimage itself.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Preimages are exactly 32 bytes.
pub const PREIMAGE_LENGTH: usize = 32;

const CONDITION_URI_PREFIX: &str = "ni:///sha-256;";
const FINGERPRINT_TYPE: &str = "preimage-sha-256";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("value is not valid base64url: {0}")]
    InvalidEncoding(String),
    #[error("Interledger preimages must be exactly 32 bytes, got {0}")]
    InvalidPreimageLength(usize),
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
}

fn decode(value: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Wrap a bare condition in its `ni:` URI form.
pub fn condition_uri(condition: &str) -> String {
    format!(
        "{}{}?fpt={}&cost=0",
        CONDITION_URI_PREFIX,
        condition.trim_end_matches('='),
        FINGERPRINT_TYPE
    )
}

/// Check that a condition URI is well formed.
///
/// # Errors
/// Returns `InvalidCondition` naming the first structural problem found.
pub fn validate_condition(uri: &str) -> Result<(), CryptoError> {
    let rest = uri
        .strip_prefix(CONDITION_URI_PREFIX)
        .ok_or_else(|| CryptoError::InvalidCondition("unsupported URI scheme".to_string()))?;
    let (hash, query) = rest.split_once('?').ok_or_else(|| {
        CryptoError::InvalidCondition("missing fingerprint parameters".to_string())
    })?;

    let digest = decode(hash)
        .map_err(|_| CryptoError::InvalidCondition("hash is not valid base64url".to_string()))?;
    if digest.len() != 32 {
        return Err(CryptoError::InvalidCondition(format!(
            "hash must be 32 bytes, got {}",
            digest.len()
        )));
    }

    let mut fingerprint_type = None;
    let mut cost = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("fpt", value)) => fingerprint_type = Some(value),
            Some(("cost", value)) => cost = Some(value),
            _ => {}
        }
    }

    match fingerprint_type {
        Some(FINGERPRINT_TYPE) => {}
        Some(other) => {
            return Err(CryptoError::InvalidCondition(format!(
                "unsupported fingerprint type {}",
                other
            )))
        }
        None => {
            return Err(CryptoError::InvalidCondition(
                "missing fingerprint type".to_string(),
            ))
        }
    }

    let cost = cost
        .ok_or_else(|| CryptoError::InvalidCondition("missing cost".to_string()))?
        .parse::<u64>()
        .map_err(|_| CryptoError::InvalidCondition("cost is not an integer".to_string()))?;
    if cost > PREIMAGE_LENGTH as u64 {
        return Err(CryptoError::InvalidCondition(format!(
            "cost {} exceeds maximum of {}",
            cost, PREIMAGE_LENGTH
        )));
    }

    Ok(())
}

/// Derive the condition a fulfilment satisfies.
///
/// # Errors
/// Fails when the fulfilment does not decode or does not decode to 32 bytes.
pub fn fulfilment_to_condition(fulfilment: &str) -> Result<String, CryptoError> {
    let preimage = decode(fulfilment)?;
    if preimage.len() != PREIMAGE_LENGTH {
        return Err(CryptoError::InvalidPreimageLength(preimage.len()));
    }
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(&preimage)))
}

/// Whether the fulfilment hashes to the condition.
///
/// # Errors
/// A fulfilment that does not decode, or decodes to anything but 32 bytes,
/// is an error rather than a mismatch.
pub fn validate_fulfil_condition(fulfilment: &str, condition: &str) -> Result<bool, CryptoError> {
    let derived = fulfilment_to_condition(fulfilment)?;
    Ok(derived == condition.trim_end_matches('='))
}
