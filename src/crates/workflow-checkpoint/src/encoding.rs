//! Recursive value encoder/decoder for the checkpoint wire format.
//!
//! User payloads already arrive as `serde_json::Value` — concrete payload
//! serialization formats are out of scope. `serde_json::Value` trees are
//! owned and acyclic by construction, so the cycle sentinel a generic
//! reference-graph encoder would need has no way to trigger here; depth
//! protection still applies, since a pathological caller can hand us
//! arbitrarily deep nesting.
//!
//! The `{kind, type, value}` envelope is preserved as an extension point:
//! types that are not plain JSON data (the framework has none today, but a
//! downstream crate might) can register a [`Codec`] under a type id and get
//! `{"__wf_type__": id, "value": ...}` envelopes that round-trip through
//! [`CodecRegistry`].

use serde_json::Value;
use std::collections::HashMap;

/// Recursion depth past which [`encode_bounded`] substitutes the
/// `"<max_depth>"` sentinel.
pub const MAX_DEPTH: usize = 100;

const MAX_DEPTH_SENTINEL: &str = "<max_depth>";

/// Walks `value` and replaces any subtree deeper than [`MAX_DEPTH`] with the
/// sentinel string `"<max_depth>"`. Safe to call on arbitrary
/// caller-supplied JSON before it is written to a checkpoint file.
pub fn encode_bounded(value: &Value) -> Value {
    encode_bounded_at(value, 0)
}

fn encode_bounded_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(MAX_DEPTH_SENTINEL.to_string());
    }
    match value {
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| encode_bounded_at(v, depth + 1)).collect())
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), encode_bounded_at(v, depth + 1));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// A codec for a non-JSON-native Rust type, identified by a stable type id.
///
/// `encode` converts `self` into plain JSON; `decode` is the inverse,
/// implemented as an associated function registered alongside the codec.
pub trait Codec: Send + Sync {
    /// Stable type id used in the `{"__wf_type__": ...}` envelope.
    fn type_id(&self) -> &str;
    /// Encode `value` (already JSON, e.g. via `serde_json::to_value`) into
    /// the envelope form.
    fn wrap(&self, value: Value) -> Value {
        serde_json::json!({ "__wf_type__": self.type_id(), "value": value })
    }
}

/// Inverse of a [`Codec`]'s `wrap`: given an envelope, recover the inner
/// value. Returns `None` if `value` is not an envelope produced by a codec
/// with a matching type id — callers fall back to treating `value` as plain
/// data, stringifying anything unrecognized on decode.
pub fn unwrap_envelope(value: &Value, type_id: &str) -> Option<Value> {
    let obj = value.as_object()?;
    if obj.get("__wf_type__")?.as_str()? != type_id {
        return None;
    }
    obj.get("value").cloned()
}

/// Registry of known codecs, keyed by type id, so a checkpoint store can
/// offer best-effort decoding of envelopes it doesn't itself understand
/// without hard-failing the whole load.
#[derive(Default)]
pub struct CodecRegistry {
    type_ids: HashMap<String, ()>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self { type_ids: HashMap::new() }
    }

    pub fn register(&mut self, type_id: impl Into<String>) {
        self.type_ids.insert(type_id.into(), ());
    }

    pub fn is_known(&self, type_id: &str) -> bool {
        self.type_ids.contains_key(type_id)
    }
}
