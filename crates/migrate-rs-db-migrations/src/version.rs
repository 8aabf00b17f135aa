//! Migration version keys.
//!
//! A [`MigrationVersion`] is parsed from strings like `"V4.3"`, `"4_3"` or
//! `"20240501.1"`: an optional leading `V`, then numeric segments separated by
//! `.` or `_`. Versions compare numerically segment by segment, and trailing
//! zero segments are insignificant, so `1.0 == 1` and `1.10 > 1.9`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use migrate_rs_core::{MigrateError, MigrateResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed, totally ordered migration version.
#[derive(Debug, Clone)]
pub struct MigrationVersion {
    segments: Vec<u64>,
}

impl MigrationVersion {
    /// Parses a version key.
    ///
    /// # Examples
    ///
    /// ```
    /// use migrate_rs_db_migrations::version::MigrationVersion;
    ///
    /// let a = MigrationVersion::parse("V1.9").unwrap();
    /// let b = MigrationVersion::parse("1_10").unwrap();
    /// assert!(a < b);
    /// assert_eq!(MigrationVersion::parse("2.0").unwrap(), MigrationVersion::parse("v2").unwrap());
    /// assert!(MigrationVersion::parse("1.x").is_err());
    /// ```
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix('V')
            .or_else(|| trimmed.strip_prefix('v'))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "Migration version '{raw}' is empty"
            )));
        }

        let segments = body
            .split(['.', '_'])
            .map(|segment| {
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(MigrateError::ConfigurationError(format!(
                        "Migration version '{raw}' must be numeric segments separated by '.' or '_'"
                    )));
                }
                segment.parse::<u64>().map_err(|e| {
                    MigrateError::ConfigurationError(format!(
                        "Migration version '{raw}' has an out-of-range segment: {e}"
                    ))
                })
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// The numeric segments as written.
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Segments with trailing zeros removed; equality and hashing use this.
    fn significant(&self) -> &[u64] {
        let len = self
            .segments
            .iter()
            .rposition(|&s| s != 0)
            .map_or(0, |i| i + 1);
        &self.segments[..len]
    }
}

impl fmt::Display for MigrationVersion {
    /// Renders the segments joined with `.`, without the `V` prefix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for MigrationVersion {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for MigrationVersion {}

impl Hash for MigrationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl Serialize for MigrationVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MigrationVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        };
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
