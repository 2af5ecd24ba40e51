//! Composite record identifiers
//!
//! An identifier is a fixed-width alphanumeric string made of four segments:
//!
//! | Segment | Width | Meaning |
//! |---|---|---|
//! | object prefix | 2 | numeric for built-in objects, letters for tenant objects |
//! | api version | 1 | |
//! | organization | 4 | organization key of the owning tenant |
//! | unique suffix | 8 | per-object sequence value |
//!
//! The values are generated by triggers inside the database; this module only
//! parses and slices them.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DataAccessError, Result};

pub const OBJECT_PREFIX_WIDTH: usize = 2;
pub const API_VERSION_WIDTH: usize = 1;
pub const ORGANIZATION_WIDTH: usize = 4;
pub const UNIQUE_SUFFIX_WIDTH: usize = 8;

/// Total identifier length, the sum of every segment width
pub const ID_LENGTH: usize =
    OBJECT_PREFIX_WIDTH + API_VERSION_WIDTH + ORGANIZATION_WIDTH + UNIQUE_SUFFIX_WIDTH;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^[A-Za-z0-9]{{{ID_LENGTH}}}$")).expect("identifier pattern is valid")
});

/// One of the fixed-width segments of an [`Identifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    ObjectPrefix,
    ApiVersion,
    Organization,
    UniqueSuffix,
}

impl SegmentKind {
    fn range(self) -> std::ops::Range<usize> {
        let start = match self {
            SegmentKind::ObjectPrefix => 0,
            SegmentKind::ApiVersion => OBJECT_PREFIX_WIDTH,
            SegmentKind::Organization => OBJECT_PREFIX_WIDTH + API_VERSION_WIDTH,
            SegmentKind::UniqueSuffix => {
                OBJECT_PREFIX_WIDTH + API_VERSION_WIDTH + ORGANIZATION_WIDTH
            }
        };
        let width = match self {
            SegmentKind::ObjectPrefix => OBJECT_PREFIX_WIDTH,
            SegmentKind::ApiVersion => API_VERSION_WIDTH,
            SegmentKind::Organization => ORGANIZATION_WIDTH,
            SegmentKind::UniqueSuffix => UNIQUE_SUFFIX_WIDTH,
        };
        start..start + width
    }
}

/// Immutable composite identifier of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Parse an identifier, failing with a format error unless the input is
    /// exactly [`ID_LENGTH`] ASCII alphanumerics
    pub fn parse(value: &str) -> Result<Self> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(DataAccessError::format(format!("Invalid id: '{}'", value)))
        }
    }

    pub fn is_valid(value: &str) -> bool {
        ID_PATTERN.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segment(&self, kind: SegmentKind) -> &str {
        &self.0[kind.range()]
    }

    pub fn object_prefix(&self) -> &str {
        self.segment(SegmentKind::ObjectPrefix)
    }

    pub fn api_version(&self) -> &str {
        self.segment(SegmentKind::ApiVersion)
    }

    pub fn organization(&self) -> &str {
        self.segment(SegmentKind::Organization)
    }

    pub fn unique_suffix(&self) -> &str {
        self.segment(SegmentKind::UniqueSuffix)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = DataAccessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = DataAccessError;

    fn try_from(value: String) -> Result<Self> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(DataAccessError::format(format!("Invalid id: '{}'", value)))
        }
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
