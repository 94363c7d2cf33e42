//! # Resource Hasher
//!
//! Deterministic digests used for drift detection and rollout triggering.
//!
//! Objects are serialized to JSON with every object key sorted before hashing,
//! so two values that are structurally equal always produce the same digest
//! regardless of field insertion order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to serialize value for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Digest of any serializable value
///
/// # Errors
///
/// Returns [`HashError::Serialization`] if the value cannot be represented as JSON.
pub fn hash_object<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let value = serde_json::to_value(value)?;
    let canonical = serde_json::to_vec(&canonicalize(value))?;
    Ok(digest(&[canonical.as_slice()]))
}

/// Digest of the serving certificate and private key
///
/// Both parts are length-prefixed so that moving bytes from one into the other
/// changes the digest.
#[must_use]
pub fn hash_serving_cert(cert_pem: &[u8], key_pem: &[u8]) -> String {
    let cert_len = (cert_pem.len() as u64).to_be_bytes();
    let key_len = (key_pem.len() as u64).to_be_bytes();
    digest(&[&cert_len, cert_pem, &key_len, key_pem])
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("sha256:{:x}", hasher.finalize())
}

/// Rebuild every object with its keys in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RunOnceDurationOverrideConfigSpec;
    use serde_json::json;

    #[test]
    fn test_equal_values_hash_equal() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(hash_object(&a).unwrap(), hash_object(&b).unwrap());
    }

    #[test]
    fn test_different_values_hash_differently() {
        let a = RunOnceDurationOverrideConfigSpec::new(3600);
        let b = RunOnceDurationOverrideConfigSpec::new(3601);
        assert_ne!(hash_object(&a).unwrap(), hash_object(&b).unwrap());
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(hash_object(&a).unwrap(), hash_object(&b).unwrap());
    }

    #[test]
    fn test_hash_is_stable_across_calls() {
        let spec = RunOnceDurationOverrideConfigSpec::new(42);
        let first = hash_object(&spec).unwrap();
        for _ in 0..10 {
            assert_eq!(hash_object(&spec).unwrap(), first);
        }
        assert!(first.starts_with("sha256:"));
        assert_eq!(first.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_serving_cert_hash_boundaries() {
        assert_ne!(
            hash_serving_cert(b"ab", b"c"),
            hash_serving_cert(b"a", b"bc")
        );
        assert_eq!(
            hash_serving_cert(b"cert", b"key"),
            hash_serving_cert(b"cert", b"key")
        );
    }
}
