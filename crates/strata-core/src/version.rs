//! Kind-tagged version vectors and half-open ranges
//!
//! Every normalized version is a fixed ten-slot `i32` vector tagged with the
//! name of its ordering regime ("semver", "dpkg", "apk", ...). Slot zero is
//! the epoch; the remaining nine are generic rank components. Comparison is
//! kind first, then the vector, both lexicographic, which gives a total
//! order within any one kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Number of slots in a version vector, epoch included
pub const VERSION_SLOTS: usize = 10;

/// An ordered, kind-tagged version
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub kind: String,
    pub v: [i32; VERSION_SLOTS],
}

impl Version {
    pub fn new(kind: impl Into<String>, v: [i32; VERSION_SLOTS]) -> Self {
        Self {
            kind: kind.into(),
            v,
        }
    }

    /// Build from any number of components up to ten, zero-padding the rest
    pub fn from_components(kind: impl Into<String>, components: &[i32]) -> Result<Self, Error> {
        if components.len() > VERSION_SLOTS {
            return Err(Error::invalid(format!(
                "too many version components: {}",
                components.len()
            )));
        }
        let mut v = [0i32; VERSION_SLOTS];
        v[..components.len()].copy_from_slice(components);
        Ok(Self::new(kind, v))
    }

    /// The default value doubles as the "not normalized" sentinel
    pub fn is_normalized(&self) -> bool {
        !self.kind.is_empty()
    }

    pub fn epoch(&self) -> i32 {
        self.v[0]
    }

    /// Human-oriented rendering: leading and trailing zero components are
    /// elided, with `!` separating a non-zero epoch from the body.
    pub fn pretty(&self) -> String {
        let body = &self.v[1..];
        let last = body
            .iter()
            .rposition(|&c| c != 0)
            .map(|i| i + 1)
            .unwrap_or(1);
        let joined = body[..last]
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        if self.epoch() != 0 {
            format!("{}!{}", self.epoch(), joined)
        } else {
            joined
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.kind)?;
        for (i, c) in self.v.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // No kind prefix means "not normalized"; the sentinel round-trips
        // through stores that persist the empty string.
        let Some((kind, rest)) = s.split_once(':') else {
            return Ok(Self::default());
        };
        if rest.is_empty() {
            return Ok(Self::new(kind, [0; VERSION_SLOTS]));
        }
        let mut components = Vec::with_capacity(VERSION_SLOTS);
        for part in rest.split('.') {
            let c: i32 = part
                .parse()
                .map_err(|_| Error::invalid(format!("bad version component {part:?} in {s:?}")))?;
            components.push(c);
        }
        Self::from_components(kind, &components)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[lower, upper)` of same-kind versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub lower: Version,
    pub upper: Version,
}

impl VersionRange {
    /// Both bounds must carry the same kind
    pub fn new(lower: Version, upper: Version) -> Result<Self, Error> {
        if lower.kind != upper.kind {
            return Err(Error::invalid(format!(
                "range bounds disagree on kind: {:?} vs {:?}",
                lower.kind, upper.kind
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn kind(&self) -> &str {
        &self.lower.kind
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.lower <= *v && self.upper > *v
    }
}
