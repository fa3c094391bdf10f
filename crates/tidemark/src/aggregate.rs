//! Slice aggregation over a series path.
//!
//! Each aggregator reads one dotted path across the series and reduces it,
//! optionally splitting the rows into `slices` equal trailing windows (a
//! leading remainder is dropped so every window has the same width).
//! Non-numeric and missing values are ignored.

use serde_json::Value;

use crate::numeric::to_float;
use crate::paths::{fetch_path, split_path};
use crate::series::Series;

impl Series {
    /// Sums a path per slice. Empty slices sum to zero.
    #[must_use]
    pub fn aggregate_sum(&self, path: &str, slices: usize) -> Vec<f64> {
        slice_groups(&self.collect_path_values(path), slices)
            .iter()
            .map(|group| numeric(group).into_iter().sum())
            .collect()
    }

    /// Averages a path per slice. Empty slices average to zero.
    #[must_use]
    pub fn aggregate_mean(&self, path: &str, slices: usize) -> Vec<f64> {
        slice_groups(&self.collect_path_values(path), slices)
            .iter()
            .map(|group| {
                let values = numeric(group);
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            })
            .collect()
    }

    /// Minimum of a path per slice; `None` when a slice has no numeric
    /// values.
    #[must_use]
    pub fn aggregate_min(&self, path: &str, slices: usize) -> Vec<Option<f64>> {
        slice_groups(&self.collect_path_values(path), slices)
            .iter()
            .map(|group| numeric(group).into_iter().reduce(f64::min))
            .collect()
    }

    /// Maximum of a path per slice; `None` when a slice has no numeric
    /// values.
    #[must_use]
    pub fn aggregate_max(&self, path: &str, slices: usize) -> Vec<Option<f64>> {
        slice_groups(&self.collect_path_values(path), slices)
            .iter()
            .map(|group| numeric(group).into_iter().reduce(f64::max))
            .collect()
    }

    fn collect_path_values(&self, path: &str) -> Vec<Option<Value>> {
        let segments = split_path(path);
        self.values
            .iter()
            .map(|row| fetch_path(row, &segments).cloned())
            .collect()
    }
}

fn numeric(group: &[Option<Value>]) -> Vec<f64> {
    group
        .iter()
        .filter_map(|value| value.as_ref().and_then(to_float))
        .collect()
}

/// Splits `values` into `slices` equal trailing windows. With fewer rows
/// than slices (or `slices <= 1`) everything lands in one window.
fn slice_groups(values: &[Option<Value>], slices: usize) -> Vec<Vec<Option<Value>>> {
    if values.is_empty() {
        return Vec::new();
    }
    if slices <= 1 {
        return vec![values.to_vec()];
    }
    let width = values.len() / slices;
    if width == 0 {
        return vec![values.to_vec()];
    }

    let start = values.len() - width * slices;
    values[start..]
        .chunks(width)
        .map(<[Option<Value>]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueMap;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use serde_json::json;

    fn as_map(value: Value) -> ValueMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn series_of(counts: &[Value]) -> Series {
        let at = (0..counts.len())
            .map(|index| {
                chrono_tz::UTC
                    .with_ymd_and_hms(2025, 2, 1, index as u32, 0, 0)
                    .single()
                    .expect("valid test instant")
            })
            .collect::<Vec<chrono::DateTime<Tz>>>();
        let values = counts
            .iter()
            .map(|count| as_map(json!({"count": count, "meta": {"duration": 1}})))
            .collect();
        Series::new(at, values)
    }

    #[test]
    fn sums_a_whole_series() {
        let series = series_of(&[json!(1), json!(2), json!(3)]);
        assert_eq!(series.aggregate_sum("count", 1), vec![6.0]);
    }

    #[test]
    fn slices_split_into_trailing_windows() {
        let series = series_of(&[json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(series.aggregate_sum("count", 2), vec![3.0, 7.0]);
    }

    #[test]
    fn uneven_rows_drop_the_leading_remainder() {
        // Five rows over two slices -> windows of two, the first row falls
        // away.
        let series = series_of(&[json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(series.aggregate_sum("count", 2), vec![5.0, 9.0]);
    }

    #[test]
    fn mean_ignores_non_numeric_rows() {
        let series = series_of(&[json!(2), json!("oops"), json!(4)]);
        assert_eq!(series.aggregate_mean("count", 1), vec![3.0]);
    }

    #[test]
    fn min_and_max_report_missing_data_as_none() {
        let series = series_of(&[json!(3), json!(1), json!(9)]);
        assert_eq!(series.aggregate_min("count", 1), vec![Some(1.0)]);
        assert_eq!(series.aggregate_max("count", 1), vec![Some(9.0)]);

        let empty = series_of(&[json!("a"), json!("b")]);
        assert_eq!(empty.aggregate_min("count", 1), vec![None]);
    }

    #[test]
    fn nested_paths_aggregate_too() {
        let series = series_of(&[json!(1), json!(2)]);
        assert_eq!(series.aggregate_sum("meta.duration", 1), vec![2.0]);
    }

    #[test]
    fn empty_series_yields_no_groups() {
        let series = Series::default();
        assert!(series.aggregate_sum("count", 1).is_empty());
    }
}
