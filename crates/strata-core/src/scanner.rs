//! Scanner plugin identity
//!
//! A plugin's identity for persistence is its `(name, version, kind)`
//! triple. Bumping the version invalidates prior artifacts for the scanner.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four plugin kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Package,
    Distribution,
    Repository,
    Coalescer,
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Package => "package",
            Self::Distribution => "distribution",
            Self::Repository => "repository",
            Self::Coalescer => "coalescer",
        };
        f.write_str(s)
    }
}

/// Persisted plugin identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScannerInfo {
    pub name: String,
    pub version: String,
    pub kind: ScannerKind,
}

impl ScannerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: ScannerKind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind,
        }
    }
}

impl fmt::Display for ScannerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.version, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_name_version_kind() {
        let a = ScannerInfo::new("apk", "1", ScannerKind::Package);
        let b = ScannerInfo::new("dpkg", "1", ScannerKind::Package);
        let c = ScannerInfo::new("dpkg", "2", ScannerKind::Package);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_display() {
        let s = ScannerInfo::new("dpkg", "3", ScannerKind::Package);
        assert_eq!(s.to_string(), "dpkg/3/package");
    }
}
