//! Canonical JSON digests.
//!
//! Ledger envelopes and due-diligence dossiers are hashed for downstream
//! verification, so serialization must be deterministic: object keys are
//! sorted recursively before hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value with all object keys sorted, recursively.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", entries.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash a JSON value in canonical form.
pub fn hash_value(value: &Value) -> String {
    compute_hash(canonical_json(value).as_bytes())
}
