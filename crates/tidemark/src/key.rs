//! Record identity: logical keys, joined strings, and identifier modes.
//!
//! A [`Key`] names one bucketed record: `(prefix, logical key, granularity,
//! bucket instant)`, plus an optional tracking override used only by the
//! system-tracking side channel. How that tuple is persisted depends on the
//! configured [`IdentifierMode`]:
//!
//! - [`IdentifierMode::Full`]: one opaque joined string.
//! - [`IdentifierMode::Partial`]: joined `prefix⊕key⊕granularity` plus the
//!   instant as its own field.
//! - [`IdentifierMode::Separated`]: key, granularity and instant as
//!   distinct fields.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// How a record's identity is laid out in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierMode {
    /// A single opaque joined key.
    #[default]
    Full,
    /// Joined key plus the bucket instant as a separate field.
    Partial,
    /// Key, granularity and instant as distinct fields.
    Separated,
}

impl IdentifierMode {
    /// Short tag used in driver descriptions.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Separated => "separated",
        }
    }
}

impl fmt::Display for IdentifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for IdentifierMode {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "full" | "FULL" => Ok(Self::Full),
            "partial" | "PARTIAL" => Ok(Self::Partial),
            "separated" | "SEPARATED" => Ok(Self::Separated),
            other => Err(Error::validation(format!(
                "unknown identifier mode: {other:?}"
            ))),
        }
    }
}

/// The identity of one bucketed record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Key {
    /// Namespace prefix, usually injected by the driver.
    pub prefix: String,
    /// The caller's logical key.
    pub key: String,
    /// Overrides the source identity recorded by system tracking.
    pub tracking_key: Option<String>,
    /// Granularity string the bucket was floored with.
    pub granularity: String,
    /// The bucket boundary instant, in the configured zone.
    pub at: Option<DateTime<Tz>>,
}

impl Key {
    /// Creates a key for a logical key and granularity.
    #[must_use]
    pub fn new(key: impl Into<String>, granularity: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            granularity: granularity.into(),
            ..Self::default()
        }
    }

    /// Sets the bucket instant.
    #[must_use]
    pub fn at(mut self, at: DateTime<Tz>) -> Self {
        self.at = Some(at);
        self
    }

    /// The identity recorded by system tracking: the tracking override when
    /// present, otherwise the logical key.
    #[must_use]
    pub fn system_tracking_key(&self) -> &str {
        self.tracking_key.as_deref().unwrap_or(&self.key)
    }

    /// Joins the non-empty components, instant included as unix seconds.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        let mut parts = self.base_parts();
        if let Some(at) = self.at {
            parts.push(at.timestamp().to_string());
        }
        parts.join(separator)
    }

    /// Joins the non-empty components without the instant.
    #[must_use]
    pub fn partial_join(&self, separator: &str) -> String {
        self.base_parts().join(separator)
    }

    /// Returns the typed identity tuple for the given mode.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the mode requires a bucket instant
    /// and the key has none.
    pub fn identifier(&self, separator: &str, mode: IdentifierMode) -> Result<Identifier> {
        match mode {
            IdentifierMode::Full => Ok(Identifier::Full {
                key: self.join(separator),
            }),
            IdentifierMode::Partial => Ok(Identifier::Partial {
                key: self.partial_join(separator),
                at: self.require_at(mode)?,
            }),
            IdentifierMode::Separated => Ok(Identifier::Separated {
                key: self.key.clone(),
                granularity: self.granularity.clone(),
                at: self.require_at(mode)?,
            }),
        }
    }

    fn require_at(&self, mode: IdentifierMode) -> Result<DateTime<Tz>> {
        self.at.ok_or_else(|| {
            Error::validation(format!("{mode} identifier requires a bucket instant"))
        })
    }

    fn base_parts(&self) -> Vec<String> {
        [&self.prefix, &self.key, &self.granularity]
            .into_iter()
            .filter(|part| !part.is_empty())
            .cloned()
            .collect()
    }
}

/// The persisted identity tuple of a record, shaped per mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    /// Single opaque key.
    Full {
        /// The joined key string.
        key: String,
    },
    /// Joined key plus instant.
    Partial {
        /// `prefix⊕key⊕granularity` joined.
        key: String,
        /// The bucket instant.
        at: DateTime<Tz>,
    },
    /// Distinct key, granularity and instant.
    Separated {
        /// The logical key.
        key: String,
        /// The granularity string.
        granularity: String,
        /// The bucket instant.
        at: DateTime<Tz>,
    },
}

impl Identifier {
    /// A stable string drivers use to pair fetched rows with requested
    /// keys.
    #[must_use]
    pub fn lookup_key(&self) -> String {
        match self {
            Self::Full { key } => key.clone(),
            Self::Partial { key, at } => format!("{key}|{}", at.timestamp()),
            Self::Separated {
                key,
                granularity,
                at,
            } => format!("{key}|{granularity}|{}", at.timestamp()),
        }
    }
}
