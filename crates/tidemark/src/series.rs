//! Value-typed series snapshots for post-processing.
//!
//! A [`Series`] pairs bucket instants with their value trees and is the
//! input to the aggregation, transform and formatting helpers. Construction
//! normalizes numeric strings and numbers to `f64` so downstream math works
//! on a single representation.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;

use crate::numeric::to_float;
use crate::ops::ValuesResult;
use crate::ValueMap;

/// A snapshot of a time series: instants and their value trees, row for
/// row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    /// Bucket instants, ascending.
    pub at: Vec<DateTime<Tz>>,
    /// One normalized value tree per instant.
    pub values: Vec<ValueMap>,
}

impl Series {
    /// Builds a series, normalizing every numeric leaf to `f64`.
    #[must_use]
    pub fn new(at: Vec<DateTime<Tz>>, values: Vec<ValueMap>) -> Self {
        Self {
            at,
            values: values.iter().map(normalize_map).collect(),
        }
    }

    /// Sorted dotted paths of every numeric leaf observed across the
    /// series.
    #[must_use]
    pub fn available_paths(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for row in &self.values {
            collect_numeric_paths(row, "", &mut seen);
        }
        seen.into_iter().collect()
    }
}

impl From<ValuesResult> for Series {
    fn from(result: ValuesResult) -> Self {
        Self::new(result.at, result.values)
    }
}

fn normalize_map(map: &ValueMap) -> ValueMap {
    map.iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::String(_) | Value::Number(_) => crate::numeric::normalize_numeric(value),
        other => other.clone(),
    }
}

fn collect_numeric_paths(
    map: &ValueMap,
    prefix: &str,
    out: &mut std::collections::BTreeSet<String>,
) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        collect_numeric_value(value, &path, out);
    }
}

fn collect_numeric_value(
    value: &Value,
    path: &str,
    out: &mut std::collections::BTreeSet<String>,
) {
    match value {
        Value::Object(map) => collect_numeric_paths(map, path, out),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_numeric_value(item, &format!("{path}.{index}"), out);
            }
        }
        leaf => {
            if to_float(leaf).is_some() {
                out.insert(path.to_string());
            }
        }
    }
}
