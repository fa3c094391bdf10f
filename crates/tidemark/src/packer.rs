//! Flattening between nested value trees and dotted-path maps.
//!
//! Storage backends persist a flat map whose keys are dotted paths
//! (`"meta.duration"`); callers work with nested trees. [`pack`] and
//! [`unpack`] form the bijection between the two for trees whose keys
//! contain no literal dots.

use serde_json::Value;

use crate::ValueMap;

/// Flattens a nested map into dotted-path keys.
///
/// Object values recurse with a `parent.child` key; all other values
/// (arrays included) are leaves and are emitted verbatim.
#[must_use]
pub fn pack(input: &ValueMap) -> ValueMap {
    let mut out = ValueMap::new();
    pack_into(input, "", &mut out);
    out
}

fn pack_into(input: &ValueMap, prefix: &str, out: &mut ValueMap) {
    for (key, value) in input {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => pack_into(nested, &path, out),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// Expands dotted-path keys back into a nested map.
///
/// Each key is split on `.` and the resulting single-branch trees are
/// deep-merged. Map-vs-map collisions recurse; a non-map collision resolves
/// to the last key visited in map iteration order. Empty keys are skipped.
#[must_use]
pub fn unpack(input: &ValueMap) -> ValueMap {
    let mut out = ValueMap::new();
    for (key, value) in input {
        if key.is_empty() {
            continue;
        }
        let parts: Vec<&str> = key.split('.').collect();
        deep_merge(&mut out, build_nested(&parts, value.clone()));
    }
    out
}

fn build_nested(parts: &[&str], value: Value) -> ValueMap {
    let mut out = ValueMap::new();
    match parts {
        [] => {}
        [leaf] => {
            out.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            out.insert(
                (*head).to_string(),
                Value::Object(build_nested(rest, value)),
            );
        }
    }
    out
}

pub(crate) fn deep_merge(target: &mut ValueMap, incoming: ValueMap) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                deep_merge(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
