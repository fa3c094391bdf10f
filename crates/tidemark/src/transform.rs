//! Derived-path arithmetic over a series.
//!
//! Each transform reads operand paths per row, computes a result, and
//! merges it back into the row under a response path. Rows missing an
//! operand (or holding a non-numeric one) pass through unchanged.

use crate::packer::{deep_merge, unpack};
use crate::paths::{fetch_path, join_segments, split_path};
use crate::series::Series;
use crate::ValueMap;

impl Series {
    /// `left + right`, stored under `response` (default `"add"`).
    #[must_use]
    pub fn transform_add(&self, left: &str, right: &str, response: &str) -> Self {
        self.binary(left, right, default_path(response, "add"), |a, b| a + b)
    }

    /// `left - right`, stored under `response` (default `"subtract"`).
    #[must_use]
    pub fn transform_subtract(&self, left: &str, right: &str, response: &str) -> Self {
        self.binary(left, right, default_path(response, "subtract"), |a, b| a - b)
    }

    /// `left * right`, stored under `response` (default `"multiply"`).
    #[must_use]
    pub fn transform_multiply(&self, left: &str, right: &str, response: &str) -> Self {
        self.binary(left, right, default_path(response, "multiply"), |a, b| a * b)
    }

    /// `left / right` (zero when `right` is zero), stored under `response`
    /// (default `"divide"`).
    #[must_use]
    pub fn transform_divide(&self, left: &str, right: &str, response: &str) -> Self {
        self.binary(left, right, default_path(response, "divide"), |a, b| {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        })
    }

    /// `left / right * 100` (zero when `right` is zero), stored under
    /// `response` (default `"ratio"`).
    #[must_use]
    pub fn transform_ratio(&self, left: &str, right: &str, response: &str) -> Self {
        self.binary(left, right, default_path(response, "ratio"), |a, b| {
            if b == 0.0 {
                0.0
            } else {
                a / b * 100.0
            }
        })
    }

    /// Sum of `paths`, stored under `response` (default `"sum"`).
    #[must_use]
    pub fn transform_sum(&self, paths: &[&str], response: &str) -> Self {
        self.multi(paths, default_path(response, "sum"), |values| {
            values.iter().sum()
        })
    }

    /// Minimum of `paths`, stored under `response` (default `"min"`).
    #[must_use]
    pub fn transform_min(&self, paths: &[&str], response: &str) -> Self {
        self.multi(paths, default_path(response, "min"), |values| {
            values.iter().copied().fold(f64::INFINITY, f64::min)
        })
    }

    /// Maximum of `paths`, stored under `response` (default `"max"`).
    #[must_use]
    pub fn transform_max(&self, paths: &[&str], response: &str) -> Self {
        self.multi(paths, default_path(response, "max"), |values| {
            values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        })
    }

    /// Mean of `paths`, stored under `response` (default `"mean"`).
    #[must_use]
    pub fn transform_mean(&self, paths: &[&str], response: &str) -> Self {
        self.multi(paths, default_path(response, "mean"), |values| {
            values.iter().sum::<f64>() / values.len() as f64
        })
    }

    /// Sample standard deviation from running `(sum, count, sum-of-squares)`
    /// paths, stored under `response` (default `"sd"`).
    ///
    /// Rows where `count * (count - 1) <= 0` or any operand is missing pass
    /// through unchanged; numeric noise is clamped at zero.
    #[must_use]
    pub fn transform_standard_deviation(
        &self,
        sum_path: &str,
        count_path: &str,
        square_path: &str,
        response: &str,
    ) -> Self {
        let response = split_path(default_path(response, "sd"));
        let sum_segments = split_path(sum_path);
        let count_segments = split_path(count_path);
        let square_segments = split_path(square_path);

        let values = self
            .values
            .iter()
            .map(|row| {
                let operands = (
                    numeric_at(row, &sum_segments),
                    numeric_at(row, &count_segments),
                    numeric_at(row, &square_segments),
                );
                let (Some(sum), Some(count), Some(square)) = operands else {
                    return row.clone();
                };

                let denominator = count * (count - 1.0);
                if denominator <= 0.0 {
                    return row.clone();
                }
                let variance = ((count * square) - sum * sum) / denominator;
                let deviation = variance.max(0.0).sqrt();
                let deviation = if deviation.is_finite() { deviation } else { 0.0 };
                merge_result(row, &response, deviation)
            })
            .collect();

        Self {
            at: self.at.clone(),
            values,
        }
    }

    fn binary(
        &self,
        left: &str,
        right: &str,
        response: &str,
        op: impl Fn(f64, f64) -> f64,
    ) -> Self {
        let response = split_path(response);
        let left_segments = split_path(left);
        let right_segments = split_path(right);

        let values = self
            .values
            .iter()
            .map(|row| {
                match (
                    numeric_at(row, &left_segments),
                    numeric_at(row, &right_segments),
                ) {
                    (Some(a), Some(b)) => merge_result(row, &response, op(a, b)),
                    _ => row.clone(),
                }
            })
            .collect();

        Self {
            at: self.at.clone(),
            values,
        }
    }

    fn multi(&self, paths: &[&str], response: &str, op: impl Fn(&[f64]) -> f64) -> Self {
        if paths.is_empty() {
            return self.clone();
        }
        let response = split_path(response);
        let segments: Vec<Vec<String>> = paths.iter().map(|path| split_path(path)).collect();

        let values = self
            .values
            .iter()
            .map(|row| {
                let operands: Option<Vec<f64>> = segments
                    .iter()
                    .map(|path| numeric_at(row, path))
                    .collect();
                match operands {
                    Some(numbers) if !numbers.is_empty() => {
                        merge_result(row, &response, op(&numbers))
                    }
                    _ => row.clone(),
                }
            })
            .collect();

        Self {
            at: self.at.clone(),
            values,
        }
    }
}

fn default_path<'a>(response: &'a str, fallback: &'a str) -> &'a str {
    if response.is_empty() {
        fallback
    } else {
        response
    }
}

fn numeric_at(row: &ValueMap, segments: &[String]) -> Option<f64> {
    fetch_path(row, segments).and_then(crate::numeric::to_float)
}

fn merge_result(row: &ValueMap, response: &[String], value: f64) -> ValueMap {
    if response.is_empty() {
        return row.clone();
    }
    let mut patch = ValueMap::new();
    patch.insert(
        join_segments(response),
        crate::numeric::float_value(value).unwrap_or(serde_json::Value::Null),
    );
    let mut out = row.clone();
    deep_merge(&mut out, unpack(&patch));
    out
}
