//! Dotted-path navigation over value trees.
//!
//! Series post-processing addresses values by dotted paths. A `*` segment
//! expands over every key observed at that position across the series
//! (array indices included), so `"requests.*"` resolves to one concrete
//! path per seen child.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ValueMap;

/// Splits a dotted path into non-empty segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<String> {
    path.trim()
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Walks `segments` down a value tree. Array segments must parse as
/// indices.
#[must_use]
pub fn fetch_path<'a>(data: &'a ValueMap, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = data.get(first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Expands wildcard segments and bare map targets into concrete paths.
///
/// Paths with a `*` expand over the keys observed across `values`; a path
/// naming a map in any row expands one level over that map's keys. Results
/// are sorted and deduplicated. A path that expands to nothing resolves to
/// itself.
#[must_use]
pub fn resolve_concrete_paths(values: &[ValueMap], segments: &[String]) -> Vec<Vec<String>> {
    if has_wildcard(segments) {
        return resolve_paths(values, segments);
    }
    if is_map_target(values, segments) {
        let mut wildcarded = segments.to_vec();
        wildcarded.push("*".to_string());
        let expanded = resolve_paths(values, &wildcarded);
        if expanded.is_empty() {
            return vec![segments.to_vec()];
        }
        return expanded;
    }
    vec![segments.to_vec()]
}

fn resolve_paths(values: &[ValueMap], segments: &[String]) -> Vec<Vec<String>> {
    let expanded = expand_segments(values, segments, &[]);
    let mut seen = BTreeSet::new();
    for path in expanded {
        seen.insert(path);
    }
    seen.into_iter().collect()
}

fn expand_segments(
    values: &[ValueMap],
    segments: &[String],
    acc: &[String],
) -> Vec<Vec<String>> {
    let Some((head, rest)) = segments.split_first() else {
        return vec![acc.to_vec()];
    };

    if head == "*" {
        let mut out = Vec::new();
        for key in collect_keys(values, acc) {
            let mut next = acc.to_vec();
            next.push(key);
            out.extend(expand_segments(values, rest, &next));
        }
        return out;
    }

    let mut next = acc.to_vec();
    next.push(head.clone());
    expand_segments(values, rest, &next)
}

fn collect_keys(values: &[ValueMap], acc: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for row in values {
        match fetch_path(row, acc) {
            Some(Value::Object(map)) => {
                seen.extend(map.keys().cloned());
            }
            Some(Value::Array(items)) => {
                seen.extend((0..items.len()).map(|index| index.to_string()));
            }
            _ => {}
        }
        if acc.is_empty() {
            seen.extend(row.keys().cloned());
        }
    }
    seen.into_iter().collect()
}

fn has_wildcard(segments: &[String]) -> bool {
    segments.iter().any(|segment| segment == "*")
}

fn is_map_target(values: &[ValueMap], segments: &[String]) -> bool {
    if segments.is_empty() {
        // An empty path targets the row itself.
        return !values.is_empty();
    }
    values
        .iter()
        .any(|row| matches!(fetch_path(row, segments), Some(Value::Object(_))))
}

/// Joins path segments back into a dotted string.
#[must_use]
pub(crate) fn join_segments(segments: &[String]) -> String {
    segments.join(".")
}
