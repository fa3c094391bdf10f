//! The packed merge protocol shared by read-modify-write drivers.
//!
//! Backends that cannot merge natively (in-memory, relational JSON) read the
//! existing packed record, merge the incoming packed values through
//! [`merge_packed`], and write the result back inside one transaction.
//! Backends with native merge primitives (hash increments, `$inc`/`$set`)
//! must match these semantics observably.

use std::fmt;

use crate::error::{Error, Result};
use crate::numeric::{float_value, to_float};
use crate::ValueMap;

/// The two write operations of the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    /// Numeric increment of each mentioned path.
    Inc,
    /// Replacement of each mentioned path.
    Set,
}

impl MergeOp {
    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inc => "inc",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for MergeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merges `incoming` into `existing`, both in packed (dotted-key) form.
///
/// `Inc` adds each incoming delta to the existing numeric value, treating an
/// absent or non-numeric existing value as zero. `Set` replaces the
/// mentioned keys. Keys absent from `incoming` are preserved untouched in
/// both operations.
///
/// # Errors
///
/// Returns `Error::Validation` when an `Inc` payload value does not coerce
/// to a finite number; the entire merge fails and `existing` is unchanged.
pub fn merge_packed(existing: &ValueMap, incoming: &ValueMap, op: MergeOp) -> Result<ValueMap> {
    let mut out = existing.clone();

    match op {
        MergeOp::Inc => {
            for (key, value) in incoming {
                let delta = to_float(value).ok_or_else(|| {
                    Error::validation(format!("increment requires a numeric value for {key:?}"))
                })?;
                let base = out.get(key).and_then(to_float).unwrap_or(0.0);
                let next = float_value(base + delta).ok_or_else(|| {
                    Error::validation(format!("increment overflows for {key:?}"))
                })?;
                out.insert(key.clone(), next);
            }
        }
        MergeOp::Set => {
            for (key, value) in incoming {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(out)
}
