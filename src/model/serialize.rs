//! Canonical JSON serializer (spec §4.1).
//!
//! Produces a deterministic byte sequence for any `serde_json::Value` so
//! that identical content yields identical blob object identifiers across
//! peers: object keys are emitted in lexicographic order, numbers use
//! `serde_json`'s own shortest round-trip form, and strings use the same
//! escaping `serde_json` already produces for a `Map` with sorted keys. The
//! function has no knowledge of storage — it is pure.

use serde_json::{Map, Value};

/// Serialize a JSON value into its canonical byte form (spec §4.1).
///
/// Guarantees `serialize(parse(serialize(x))) == serialize(x)` for any `x`
/// representable as a `serde_json::Value` (spec §8 property 2).
#[must_use]
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let sorted = sort_keys(value);
    // `serde_json::Value`'s own `Serialize` impl already emits the shortest
    // round-trip numeric form and canonical string escaping; sorting keys
    // beforehand is the only extra step canonicalization requires.
    serde_json::to_vec(&sorted).expect("Value serialization is infallible")
}

/// Serialize a JSON value into a canonical `String`.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    String::from_utf8(canonical_bytes(value)).expect("canonical JSON output is valid UTF-8")
}

/// Recursively rebuild `value` with every object's keys in lexicographic
/// order. `serde_json::Map` defaults to insertion order (or a `BTreeMap`
/// under the `preserve_order` feature is absent here), so canonicalization
/// walks the tree and re-inserts keys sorted.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
