use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Format used to stamp a version from a point in time (`YYYYMMDDHHMMSS`).
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

const STAMP_MIN: u64 = 10_000_000_000_000;
const STAMP_MAX: u64 = 99_999_999_999_999;

/// Identifier of a single data migration, derived from the UTC timestamp at
/// which it was generated. Versions compare as integers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Sentinel reported as the current version when nothing has been applied.
    pub const ZERO: Version = Version(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Stamp a version from `at`, to the second.
    ///
    /// Only years 1000..=9999 give the 14-digit stamp a migration filename
    /// needs; anything else is `InvalidVersion`.
    pub fn from_timestamp(at: DateTime<Utc>) -> Result<Self, Error> {
        let stamp = at.format(VERSION_FORMAT).to_string();
        match stamp.parse::<u64>() {
            Ok(value) if (STAMP_MIN..=STAMP_MAX).contains(&value) => Ok(Self(value)),
            _ => Err(Error::InvalidVersion(format!(
                "'{stamp}' is not a 14-digit timestamp version"
            ))),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidVersion(format!(
                "'{s}' is not a numeric version"
            )));
        }
        let value: u64 = s
            .parse()
            .map_err(|e| Error::InvalidVersion(format!("'{s}': {e}")))?;
        if value == 0 {
            return Err(Error::InvalidVersion("version must be non-zero".into()));
        }
        Ok(Self(value))
    }
}
