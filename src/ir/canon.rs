//! Canonical JSON (spec §4.5): keys sorted at every object level, stable
//! array order, SHA-256 the single hashing primitive used for every
//! identity and the bundle report self-hash.

use serde_json::Value as Json;
use sha2::{Digest, Sha256};

/// Re-serializes `v` with every object's keys in sorted order. `serde_json`
/// with the `preserve_order` feature keeps insertion order by default, so
/// canonicalization is an explicit recursive sort rather than relying on a
/// serializer flag.
pub fn canonicalize(v: &Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut entries: Vec<(String, Json)> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON bytes: sorted keys, compact, no extraneous whitespace.
pub fn canonical_bytes(v: &Json) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(v)).expect("canonical JSON never fails to serialize")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sha256_of_json(v: &Json) -> String {
    sha256_hex(&canonical_bytes(v))
}

/// Minimal hex encoder so the crate doesn't need a dependency purely for
/// this; kept tiny and local to `canon` since it's the only caller.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_recursively() {
        let v = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let c = canonicalize(&v);
        let s = serde_json::to_string(&c).unwrap();
        assert_eq!(s, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn array_order_preserved() {
        let v = json!({"xs": [3, 1, 2]});
        let c = canonicalize(&v);
        assert_eq!(c["xs"], json!([3, 1, 2]));
    }

    #[test]
    fn hash_is_deterministic() {
        let v = json!({"b": 1, "a": 2});
        let h1 = sha256_of_json(&v);
        let h2 = sha256_of_json(&json!({"a": 2, "b": 1}));
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
