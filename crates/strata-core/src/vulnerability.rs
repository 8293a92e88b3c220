//! Vulnerability advisories as stored and matched

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::package::Package;
use crate::repository::Repository;
use crate::severity::Severity;
use crate::version::VersionRange;

/// How a vulnerability's architecture constraint is applied to a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchOperation {
    #[default]
    Equals,
    NotEquals,
    PatternMatch,
}

impl ArchOperation {
    /// Apply the operation between the vulnerability's arch and the record's.
    ///
    /// An empty vulnerability arch matches anything. For `PatternMatch` the
    /// arch is compiled as a regex; a pattern that fails to compile is a
    /// non-match rather than an error.
    pub fn matches(&self, vuln_arch: Option<&str>, record_arch: Option<&str>) -> bool {
        let pattern = vuln_arch.unwrap_or("");
        if pattern.is_empty() {
            return true;
        }
        let record = record_arch.unwrap_or("");
        match self {
            Self::Equals => pattern == record,
            Self::NotEquals => pattern != record,
            Self::PatternMatch => match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(record),
                Err(_) => false,
            },
        }
    }
}

impl fmt::Display for ArchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => f.write_str("equals"),
            Self::NotEquals => f.write_str("not_equals"),
            Self::PatternMatch => f.write_str("pattern_match"),
        }
    }
}

/// One advisory row, scoped to a package pattern and optionally a
/// distribution and repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(default)]
    pub id: String,
    /// Name of the updater that produced this row
    #[serde(default)]
    pub updater: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: String,
    /// Severity as reported by the source, verbatim
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub normalized_severity: Severity,
    /// Package name/kind pattern the advisory applies to
    pub package: Package,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<Repository>,
    /// First version no longer affected, in the ecosystem's own syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_in_version: Option<String>,
    /// Affected range over normalized versions, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<VersionRange>,
    #[serde(default)]
    pub arch_operation: ArchOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}
