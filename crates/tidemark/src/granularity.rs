//! Granularity strings and their `(offset, unit)` form.
//!
//! A granularity is one or more ASCII digits followed by a unit suffix:
//! `"15m"`, `"1mo"`, `"4q"`. Anything else is rejected, including a zero
//! offset.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Calendar unit of a bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// Seconds (`s`).
    Second,
    /// Minutes (`m`).
    Minute,
    /// Hours (`h`).
    Hour,
    /// Days (`d`), phase-anchored to January 1st.
    Day,
    /// Weeks (`w`), anchored to the first complete week of the year.
    Week,
    /// Calendar months (`mo`).
    Month,
    /// Calendar quarters (`q`).
    Quarter,
    /// Calendar years (`y`).
    Year,
}

impl Unit {
    /// Parses a unit suffix.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(Self::Second),
            "m" => Some(Self::Minute),
            "h" => Some(Self::Hour),
            "d" => Some(Self::Day),
            "w" => Some(Self::Week),
            "mo" => Some(Self::Month),
            "q" => Some(Self::Quarter),
            "y" => Some(Self::Year),
            _ => None,
        }
    }

    /// The canonical suffix for this unit.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
            Self::Day => "d",
            Self::Week => "w",
            Self::Month => "mo",
            Self::Quarter => "q",
            Self::Year => "y",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A parsed bucket width, retaining its source string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Granularity {
    /// How many units wide a bucket is. Always at least 1.
    pub offset: u32,
    /// The calendar unit.
    pub unit: Unit,
    raw: String,
}

impl Granularity {
    /// Parses `"15m"`-style input into `(offset, unit)`.
    ///
    /// Returns `None` on empty offsets, zero offsets, unknown suffixes, or
    /// missing suffixes.
    #[must_use]
    pub fn parse(input: &str) -> Option<(u32, Unit)> {
        let digits_end = input.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let offset: u32 = input[..digits_end].parse().ok()?;
        if offset == 0 {
            return None;
        }
        let unit = Unit::from_suffix(&input[digits_end..])?;
        Some((offset, unit))
    }

    /// The original granularity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (offset, unit) = Self::parse(input)
            .ok_or_else(|| Error::validation(format!("invalid granularity: {input:?}")))?;
        Ok(Self {
            offset,
            unit,
            raw: input.to_string(),
        })
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit_suffix() {
        let cases = [
            ("30s", 30, Unit::Second),
            ("15m", 15, Unit::Minute),
            ("1h", 1, Unit::Hour),
            ("7d", 7, Unit::Day),
            ("2w", 2, Unit::Week),
            ("1mo", 1, Unit::Month),
            ("4q", 4, Unit::Quarter),
            ("10y", 10, Unit::Year),
        ];
        for (input, offset, unit) in cases {
            let parsed: Granularity = input.parse().unwrap();
            assert_eq!(parsed.offset, offset, "offset for {input}");
            assert_eq!(parsed.unit, unit, "unit for {input}");
            assert_eq!(parsed.as_str(), input);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "m", "15", "0m", "15x", "1.5h", "-1d", "15 m", "mo1"] {
            assert!(
                input.parse::<Granularity>().is_err(),
                "expected {input:?} to be invalid"
            );
        }
    }

    #[test]
    fn minute_and_month_suffixes_are_distinct() {
        assert_eq!(Granularity::parse("1m"), Some((1, Unit::Minute)));
        assert_eq!(Granularity::parse("1mo"), Some((1, Unit::Month)));
    }

    #[test]
    fn display_round_trips_the_source_string() {
        let parsed: Granularity = "15m".parse().unwrap();
        assert_eq!(parsed.to_string(), "15m");
        assert_eq!(parsed.unit.to_string(), "m");
    }
}
