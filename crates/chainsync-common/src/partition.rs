//! Partition keys
//!
//! Source files are grouped by calendar day. The day is never read from a
//! record: it comes from the directory a file lives in, either as a bare
//! `YYYY-MM-DD` component (local layout) or as a `date=YYYY-MM-DD` component
//! (object-store layout).

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while parsing or deriving partition dates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("date must be in YYYY-MM-DD format, got: {0}")]
    Format(String),

    #[error("invalid date: {0}")]
    Invalid(String),

    #[error("end date {end} is before start date {start}")]
    ReversedRange { start: PartitionDate, end: PartitionDate },

    #[error("no partition date found in path: {0}")]
    NotInPath(String),
}

/// A calendar day used as the partition key for source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionDate(NaiveDate);

impl PartitionDate {
    /// Current day in UTC
    pub fn today_utc() -> Self {
        Self(Utc::now().date_naive())
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// Derive the partition from the nearest directory component that
    /// encodes a date.
    pub fn from_path(path: &Path) -> Result<Self, PartitionError> {
        path.components()
            .rev()
            .filter_map(|component| component.as_os_str().to_str())
            .find_map(|segment| {
                let candidate = segment.strip_prefix("date=").unwrap_or(segment);
                candidate.parse().ok()
            })
            .ok_or_else(|| PartitionError::NotInPath(path.display().to_string()))
    }

    /// Every day from `start` to `end`, both inclusive
    pub fn range(start: Self, end: Self) -> Result<Vec<Self>, PartitionError> {
        if end < start {
            return Err(PartitionError::ReversedRange { start, end });
        }

        let mut dates = Vec::new();
        let mut current = start.0;
        while current <= end.0 {
            dates.push(Self(current));
            match current.checked_add_days(Days::new(1)) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(dates)
    }
}

impl FromStr for PartitionDate {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
            return Err(PartitionError::Format(s.to_string()));
        }

        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Self)
            .map_err(|e| PartitionError::Invalid(format!("{}: {}", s, e)))
    }
}

impl fmt::Display for PartitionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl From<NaiveDate> for PartitionDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl Serialize for PartitionDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PartitionDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
