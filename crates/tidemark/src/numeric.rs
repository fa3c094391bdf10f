//! Numeric coercion for heterogeneous value trees.
//!
//! Every arithmetic path in the engine goes through [`to_float`]: increments,
//! buffer aggregation, series math. Values that do not coerce are either
//! validation errors (increments) or ignored (series aggregation), never
//! silent zeros.

use serde_json::Value;

/// Coerces a scalar value to `f64`.
///
/// Accepts JSON numbers of any width and numeric strings (trimmed before
/// parsing). Rejects non-finite results, empty or non-parseable strings,
/// bools, nulls, arrays, and objects.
#[must_use]
pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|f| f.is_finite()),
        Value::String(text) => parse_numeric_str(text),
        _ => None,
    }
}

/// Coerces a value to `f64`, falling back to `fallback` when it does not
/// represent a number.
#[must_use]
pub fn to_float_or(value: &Value, fallback: f64) -> f64 {
    to_float(value).unwrap_or(fallback)
}

/// Returns the canonical numeric form of a value: numbers and numeric
/// strings become `f64`-backed numbers, everything else is returned
/// unchanged.
#[must_use]
pub fn normalize_numeric(value: &Value) -> Value {
    to_float(value).and_then(float_value).unwrap_or_else(|| value.clone())
}

/// Parses a trimmed decimal string into a finite `f64`.
#[must_use]
pub(crate) fn parse_numeric_str(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Builds a JSON number from a finite float. `None` for NaN/infinity.
#[must_use]
pub(crate) fn float_value(value: f64) -> Option<Value> {
    serde_json::Number::from_f64(value).map(Value::Number)
}
