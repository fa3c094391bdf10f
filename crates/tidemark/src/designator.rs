//! Bucket-label classifiers for histogram-style tracking.
//!
//! A designator maps a numeric value to a stable bucket label, so callers
//! can track distributions (`Track(key, {designated_label: 1})`) without a
//! histogram type in the store. Values above the top bucket label as
//! `"<max>+"`; non-numeric values produce no label.

use serde_json::Value;

use crate::numeric::to_float;

/// Classifies values into bucket labels.
pub trait Designator {
    /// The bucket label for `value`, or `None` when the value is not
    /// numeric.
    fn designate(&self, value: &Value) -> Option<String>;
}

/// Fixed-width linear buckets between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDesignator {
    /// Values at or below this label as themselves.
    pub min: f64,
    /// Values above this label as `"<max>+"`.
    pub max: f64,
    /// Bucket width. Zero designates nothing.
    pub step: u32,
}

impl LinearDesignator {
    /// Builds a linear designator.
    #[must_use]
    pub fn new(min: f64, max: f64, step: u32) -> Self {
        Self { min, max, step }
    }
}

impl Designator for LinearDesignator {
    fn designate(&self, value: &Value) -> Option<String> {
        let value = to_float(value)?;
        if self.step == 0 {
            return None;
        }

        if value <= self.min {
            return Some(format_label(value));
        }
        if value > self.max {
            return Some(format!("{}+", format_label(self.max)));
        }

        let ceiling = value.ceil();
        let step = f64::from(self.step);
        let mut bucket = (ceiling / step).floor() * step;
        if ceiling % step != 0.0 {
            bucket += step;
        }
        Some(format_label(bucket))
    }
}

/// Powers-of-ten buckets in both directions around 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricDesignator {
    /// Values at or below this label as the minimum bucket. Clamped at
    /// zero.
    pub min: f64,
    /// Values above this label as `"<max>+"`.
    pub max: f64,
}

impl GeometricDesignator {
    /// Builds a geometric designator; a negative minimum clamps to zero.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: min.max(0.0),
            max,
        }
    }
}

impl Designator for GeometricDesignator {
    fn designate(&self, value: &Value) -> Option<String> {
        let value = to_float(value)?;

        if value <= self.min {
            return Some(format_decimal_label(self.min));
        }
        if value > self.max {
            return Some(format!("{}+", format_decimal_label(self.max)));
        }
        if value > 1.0 {
            let digits = (value.floor() as i64).to_string().len() as i32;
            return Some(format_decimal_label(10f64.powi(digits)));
        }
        if value > 0.1 {
            return Some(format_decimal_label(1.0));
        }

        let zeros = leading_zeros_after_decimal(value);
        if zeros == 0 {
            return Some(format_decimal_label(1.0));
        }
        Some(format_decimal_label(1.0 / 10f64.powi(zeros)))
    }
}

/// Explicit sorted bucket boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomDesignator {
    /// Ascending bucket boundaries.
    pub buckets: Vec<f64>,
}

impl CustomDesignator {
    /// Builds a custom designator; boundaries are sorted on construction.
    #[must_use]
    pub fn new(mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(f64::total_cmp);
        Self { buckets }
    }
}

impl Designator for CustomDesignator {
    fn designate(&self, value: &Value) -> Option<String> {
        let value = to_float(value)?;
        let first = *self.buckets.first()?;
        let last = *self.buckets.last()?;

        if value <= first {
            return Some(format_label(first));
        }
        if value > last {
            return Some(format!("{}+", format_label(last)));
        }

        let ceiling = value.ceil();
        for bucket in &self.buckets {
            if ceiling < *bucket {
                return Some(format_label(*bucket));
            }
        }
        Some(format_label(last))
    }
}

fn format_label(value: f64) -> String {
    if value == value.trunc() {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Geometric labels keep one decimal on integral values (`"10.0"`), so the
/// label set stays uniform across the sub-1.0 buckets.
fn format_decimal_label(value: f64) -> String {
    if value == value.trunc() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn leading_zeros_after_decimal(value: f64) -> i32 {
    let text = format!("{}", value.abs());
    let Some((_, fraction)) = text.split_once('.') else {
        return 0;
    };
    fraction.chars().take_while(|c| *c == '0').count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod linear_tests {
        use super::*;

        #[test]
        fn buckets_round_up_to_step_multiples() {
            let designator = LinearDesignator::new(0.0, 100.0, 10);
            assert_eq!(designator.designate(&json!(1)), Some("10".to_string()));
            assert_eq!(designator.designate(&json!(10)), Some("10".to_string()));
            assert_eq!(designator.designate(&json!(11)), Some("20".to_string()));
            assert_eq!(designator.designate(&json!(55.2)), Some("60".to_string()));
        }

        #[test]
        fn values_at_or_below_min_label_as_themselves() {
            let designator = LinearDesignator::new(0.0, 100.0, 10);
            assert_eq!(designator.designate(&json!(0)), Some("0".to_string()));
            assert_eq!(designator.designate(&json!(-5)), Some("-5".to_string()));
        }

        #[test]
        fn values_above_max_get_a_plus_label() {
            let designator = LinearDesignator::new(0.0, 100.0, 10);
            assert_eq!(designator.designate(&json!(101)), Some("100+".to_string()));
        }

        #[test]
        fn zero_step_designates_nothing() {
            let designator = LinearDesignator::new(0.0, 100.0, 0);
            assert_eq!(designator.designate(&json!(5)), None);
        }

        #[test]
        fn non_numeric_values_designate_nothing() {
            let designator = LinearDesignator::new(0.0, 100.0, 10);
            assert_eq!(designator.designate(&json!("fast")), None);
        }
    }

    mod geometric_tests {
        use super::*;

        #[test]
        fn buckets_are_powers_of_ten() {
            let designator = GeometricDesignator::new(0.0, 10_000.0);
            assert_eq!(designator.designate(&json!(5)), Some("10.0".to_string()));
            assert_eq!(designator.designate(&json!(42)), Some("100.0".to_string()));
            assert_eq!(designator.designate(&json!(950)), Some("1000.0".to_string()));
        }

        #[test]
        fn sub_unit_values_bucket_by_leading_zeros() {
            let designator = GeometricDesignator::new(0.0, 100.0);
            assert_eq!(designator.designate(&json!(0.5)), Some("1.0".to_string()));
            assert_eq!(designator.designate(&json!(0.05)), Some("0.1".to_string()));
            assert_eq!(designator.designate(&json!(0.005)), Some("0.01".to_string()));
        }

        #[test]
        fn bounds_clamp_and_overflow() {
            let designator = GeometricDesignator::new(1.0, 100.0);
            assert_eq!(designator.designate(&json!(0.2)), Some("1.0".to_string()));
            assert_eq!(designator.designate(&json!(500)), Some("100.0+".to_string()));
        }

        #[test]
        fn negative_minimum_clamps_to_zero() {
            let designator = GeometricDesignator::new(-5.0, 100.0);
            assert_eq!(designator.min, 0.0);
        }
    }

    mod custom_tests {
        use super::*;

        #[test]
        fn values_fall_into_the_next_boundary() {
            let designator = CustomDesignator::new(vec![10.0, 50.0, 100.0]);
            assert_eq!(designator.designate(&json!(15)), Some("50".to_string()));
            assert_eq!(designator.designate(&json!(50)), Some("100".to_string()));
            assert_eq!(designator.designate(&json!(99)), Some("100".to_string()));
        }

        #[test]
        fn boundaries_sort_on_construction() {
            let designator = CustomDesignator::new(vec![100.0, 10.0, 50.0]);
            assert_eq!(designator.buckets, vec![10.0, 50.0, 100.0]);
        }

        #[test]
        fn bounds_behave_like_linear() {
            let designator = CustomDesignator::new(vec![10.0, 100.0]);
            assert_eq!(designator.designate(&json!(3)), Some("10".to_string()));
            assert_eq!(designator.designate(&json!(250)), Some("100+".to_string()));
        }

        #[test]
        fn empty_boundaries_designate_nothing() {
            let designator = CustomDesignator::new(Vec::new());
            assert_eq!(designator.designate(&json!(5)), None);
        }
    }
}
