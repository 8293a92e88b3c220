//! Installed package model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Whether a package row describes a binary install or its source package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Binary,
    Source,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Source => f.write_str("source"),
        }
    }
}

/// A package discovered in a layer
///
/// `id` is assigned by the store; within one index report it is a stable map
/// key. The `source` relation is at most one level deep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: PackageKind,
    pub version: String,
    /// Kind-tagged vector used for in-store range checks, when the ecosystem
    /// scanner could produce one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Ecosystem-scoped locator of the database the package was read from,
    /// e.g. `var/lib/dpkg/status`
    #[serde(default)]
    pub package_db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Package>>,
}

impl Package {
    /// Identity used for dedup during coalescing: everything that makes two
    /// scans of the same installed package indistinguishable.
    pub fn dedup_key(&self) -> (String, String, PackageKind, Option<String>, Option<String>) {
        (
            self.name.clone(),
            self.version.clone(),
            self.kind,
            self.arch.clone(),
            self.module.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PackageKind::Binary).unwrap(), "\"binary\"");
        assert_eq!(serde_json::to_string(&PackageKind::Source).unwrap(), "\"source\"");
    }

    #[test]
    fn test_source_is_one_level() {
        let pkg = Package {
            name: "bash".into(),
            version: "5.0-6ubuntu1.1".into(),
            source: Some(Box::new(Package {
                name: "bash".into(),
                version: "5.0-6ubuntu1.1".into(),
                kind: PackageKind::Source,
                ..Default::default()
            })),
            ..Default::default()
        };
        let json = serde_json::to_string(&pkg).unwrap();
        let back: Package = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source.as_ref().unwrap().kind, PackageKind::Source);
        assert!(back.source.unwrap().source.is_none());
    }
}
