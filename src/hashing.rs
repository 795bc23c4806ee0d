//! Hashing System - SHA-256 for Stored Designs
//!
//! Blob integrity and content fingerprints. Fingerprints hash canonical JSON
//! so key order never changes the result.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check a payload against a recorded hex digest. Case-insensitive.
pub fn verify_sha256(data: &[u8], expected_hex: &str) -> bool {
    sha256_hex(data).eq_ignore_ascii_case(expected_hex.trim())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Fingerprint of a design document: sha256 over its canonical JSON.
pub fn compute_document_hash<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(document)?;
    Ok(sha256_hex(canonical.as_bytes()))
}
