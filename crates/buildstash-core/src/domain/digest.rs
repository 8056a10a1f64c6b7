//! Canonical JSON and fingerprint computation (RFC 8785-class).
//!
//! - UTF-16 code unit ordering for object keys (§3.2.3)
//! - SHA256 hex digest of the canonical bytes
//!
//! Build configs only carry strings, booleans, arrays and one integer format
//! tag, so numbers are written as serde_json renders them.

use crate::domain::error::Result;
use stash_state::Fingerprint;

/// Write `value` as compact JSON with object keys in UTF-16 code unit order
/// (RFC 8785 §3.2.3).
///
/// `serde_json::Map` re-sorts keys by UTF-8 bytes on insert, so the ordering has
/// to happen while writing rather than by rebuilding the map.
fn write_sorted_utf16(value: &serde_json::Value, out: &mut String) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_sorted_utf16(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        serde_json::Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted_utf16(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Compact JSON with object keys in UTF-16 order.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    let mut out = String::new();
    write_sorted_utf16(value, &mut out)?;
    Ok(out)
}

/// Fingerprint of the canonical JSON form of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<Fingerprint> {
    let canonical = canonical_json(value)?;
    Ok(Fingerprint::from_bytes(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_is_compact() {
        let input = serde_json::json!({ "format": 1, "push": false, "tags": ["a", "b"] });
        let canonical = canonical_json(&input).expect("canonical_json");
        assert_eq!(canonical, r#"{"format":1,"push":false,"tags":["a","b"]}"#);
    }

    #[test]
    fn test_canonical_json_field_order_invariant() {
        let input1 = serde_json::json!({ "a": 1, "b": 2, "c": 3 });
        let input2 = serde_json::json!({ "c": 3, "a": 1, "b": 2 });
        assert_eq!(
            canonical_json(&input1).expect("canonical 1"),
            canonical_json(&input2).expect("canonical 2")
        );
    }

    #[test]
    fn test_canonical_json_nested_field_order_invariant() {
        let input1 = serde_json::json!({ "outer": { "z": 1, "y": 2, "x": 3 } });
        let input2 = serde_json::json!({ "outer": { "x": 3, "y": 2, "z": 1 } });
        assert_eq!(
            canonical_json(&input1).expect("canonical 1"),
            canonical_json(&input2).expect("canonical 2")
        );
    }

    #[test]
    fn test_canonical_json_array_order_preserved() {
        let input1 = serde_json::json!({ "array": [3, 1, 2] });
        let input2 = serde_json::json!({ "array": [1, 2, 3] });
        assert_ne!(
            canonical_json(&input1).expect("canonical 1"),
            canonical_json(&input2).expect("canonical 2")
        );
    }

    #[test]
    fn test_canonical_json_utf16_key_order() {
        // U+1F600 sorts after U+FF61 by UTF-8 bytes but before it by UTF-16 code units.
        let input = serde_json::json!({ "\u{1F600}": 1, "\u{FF61}": 2 });
        let canonical = canonical_json(&input).expect("canonical_json");
        assert_eq!(canonical, "{\"\u{1F600}\":1,\"\u{FF61}\":2}");
    }

    #[test]
    fn test_compute_digest_single_field_delta() {
        let d1 = compute_digest(&serde_json::json!({ "tag": "app:v1" })).expect("digest 1");
        let d2 = compute_digest(&serde_json::json!({ "tag": "app:v2" })).expect("digest 2");
        assert_ne!(d1, d2);
        assert_eq!(d1.as_str().len(), 64);
    }
}
