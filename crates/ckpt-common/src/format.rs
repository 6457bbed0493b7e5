//! Format identifiers and conversion direction

use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a converter's declared `(left, right)` format pair.
///
/// The side passed to a conversion is the *source* side; the other one is
/// the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// Pick the element of a `(left, right)` pair that belongs to this side.
    pub fn pick<T>(self, left: T, right: T) -> T {
        match self {
            Self::Left => left,
            Self::Right => right,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Opaque tag naming a schema variant and the versions it covers.
///
/// `FormatVersions::new(&["cs-1.8", "cs-1.9"])` declares a schema that two
/// release lines share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatVersions(&'static [&'static str]);

impl FormatVersions {
    pub const fn new(versions: &'static [&'static str]) -> Self {
        Self(versions)
    }

    pub fn versions(&self) -> &'static [&'static str] {
        self.0
    }

    pub fn contains(&self, version: &str) -> bool {
        self.0.iter().any(|v| v.eq_ignore_ascii_case(version))
    }
}

impl fmt::Display for FormatVersions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl Serialize for FormatVersions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
