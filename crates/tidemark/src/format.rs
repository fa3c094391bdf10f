//! Chart-ready shapes from a series.
//!
//! Timeline formatting pairs every bucket instant with one numeric value
//! per resolved path; category formatting sums each resolved path into a
//! labelled total. Both accept wildcard paths and an optional split into
//! equal trailing slices.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::numeric::to_float;
use crate::paths::{fetch_path, join_segments, resolve_concrete_paths, split_path};
use crate::series::Series;

/// One timeline entry: a bucket instant and the value observed there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelinePoint {
    /// The bucket instant.
    pub at: DateTime<Tz>,
    /// The value at that instant; missing or non-numeric values read as
    /// zero.
    pub value: f64,
}

impl Series {
    /// Formats a path into per-instant points, one entry per resolved
    /// concrete path.
    ///
    /// With `slices > 1` each path's points split into equal trailing
    /// windows; otherwise a single window holds the whole series.
    #[must_use]
    pub fn format_timeline(
        &self,
        path: &str,
        slices: usize,
    ) -> BTreeMap<String, Vec<Vec<TimelinePoint>>> {
        if self.at.is_empty() {
            return BTreeMap::new();
        }

        let segments = split_path(path);
        let resolved = resolve_concrete_paths(&self.values, &segments);

        let rows = self.at.len().min(self.values.len());
        let mut out = BTreeMap::new();
        for concrete in resolved {
            let points: Vec<TimelinePoint> = (0..rows)
                .map(|index| TimelinePoint {
                    at: self.at[index],
                    value: fetch_path(&self.values[index], &concrete)
                        .and_then(to_float)
                        .unwrap_or(0.0),
                })
                .collect();
            out.insert(join_segments(&concrete), slice_points(points, slices));
        }
        out
    }

    /// Sums every resolved concrete path into a labelled total, one map
    /// per slice.
    #[must_use]
    pub fn format_category(&self, path: &str, slices: usize) -> Vec<BTreeMap<String, f64>> {
        if self.values.is_empty() {
            return Vec::new();
        }

        let segments = split_path(path);
        let resolved = resolve_concrete_paths(&self.values, &segments);

        slice_rows(&self.values, slices)
            .iter()
            .map(|window| {
                let mut totals = BTreeMap::new();
                for row in *window {
                    for concrete in &resolved {
                        let value = fetch_path(row, concrete)
                            .and_then(to_float)
                            .unwrap_or(0.0);
                        *totals.entry(join_segments(concrete)).or_insert(0.0) += value;
                    }
                }
                totals
            })
            .collect()
    }
}

fn slice_points(points: Vec<TimelinePoint>, slices: usize) -> Vec<Vec<TimelinePoint>> {
    if points.is_empty() {
        return Vec::new();
    }
    if slices <= 1 {
        return vec![points];
    }
    let width = points.len() / slices;
    if width == 0 {
        return vec![points];
    }
    let start = points.len() - width * slices;
    points[start..]
        .chunks(width)
        .map(<[TimelinePoint]>::to_vec)
        .collect()
}

fn slice_rows(rows: &[crate::ValueMap], slices: usize) -> Vec<&[crate::ValueMap]> {
    if rows.is_empty() {
        return Vec::new();
    }
    if slices <= 1 {
        return vec![rows];
    }
    let width = rows.len() / slices;
    if width == 0 {
        return vec![rows];
    }
    let start = rows.len() - width * slices;
    rows[start..].chunks(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueMap;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn as_map(value: Value) -> ValueMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn series(rows: Vec<Value>) -> Series {
        let at = (0..rows.len())
            .map(|index| {
                chrono_tz::UTC
                    .with_ymd_and_hms(2025, 2, 1, index as u32, 0, 0)
                    .single()
                    .expect("valid test instant")
            })
            .collect();
        Series::new(at, rows.into_iter().map(as_map).collect())
    }

    #[test]
    fn timeline_pairs_instants_with_values() {
        let s = series(vec![json!({"count": 1}), json!({"count": 3})]);
        let formatted = s.format_timeline("count", 1);

        let windows = formatted.get("count").expect("count path");
        assert_eq!(windows.len(), 1);
        let points = &windows[0];
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[1].value, 3.0);
        assert_eq!(points[0].at, s.at[0]);
    }

    #[test]
    fn timeline_missing_values_read_as_zero() {
        let s = series(vec![json!({"count": 1}), json!({})]);
        let formatted = s.format_timeline("count", 1);
        assert_eq!(formatted["count"][0][1].value, 0.0);
    }

    #[test]
    fn timeline_wildcards_emit_one_entry_per_path() {
        let s = series(vec![
            json!({"requests": {"get": 1, "post": 2}}),
            json!({"requests": {"get": 3}}),
        ]);
        let formatted = s.format_timeline("requests.*", 1);

        assert_eq!(
            formatted.keys().collect::<Vec<_>>(),
            vec!["requests.get", "requests.post"]
        );
        assert_eq!(formatted["requests.get"][0][1].value, 3.0);
        assert_eq!(formatted["requests.post"][0][1].value, 0.0);
    }

    #[test]
    fn timeline_slices_split_into_trailing_windows() {
        let s = series(vec![
            json!({"count": 1}),
            json!({"count": 2}),
            json!({"count": 3}),
            json!({"count": 4}),
        ]);
        let formatted = s.format_timeline("count", 2);
        let windows = &formatted["count"];
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0][0].value, 1.0);
        assert_eq!(windows[1][1].value, 4.0);
    }

    #[test]
    fn empty_series_formats_to_nothing() {
        let s = Series::default();
        assert!(s.format_timeline("count", 1).is_empty());
        assert!(s.format_category("count", 1).is_empty());
    }

    #[test]
    fn category_sums_resolved_paths() {
        let s = series(vec![
            json!({"requests": {"get": 1, "post": 2}}),
            json!({"requests": {"get": 3}}),
        ]);
        let totals = s.format_category("requests", 1);

        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].get("requests.get"), Some(&4.0));
        assert_eq!(totals[0].get("requests.post"), Some(&2.0));
    }

    #[test]
    fn category_slices_produce_one_total_per_window() {
        let s = series(vec![
            json!({"count": 1}),
            json!({"count": 2}),
            json!({"count": 3}),
            json!({"count": 4}),
        ]);
        let totals = s.format_category("count", 2);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].get("count"), Some(&3.0));
        assert_eq!(totals[1].get("count"), Some(&7.0));
    }
}
