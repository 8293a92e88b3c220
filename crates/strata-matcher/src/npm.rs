//! npm matcher
//!
//! Correlates packages installed from the npm registry. The registry URI is
//! part of both the filter and the query, so advisories scoped to another
//! registry (a Go module proxy, say) can never reach an npm record even
//! when the package names collide.

use std::cmp::Ordering;

use async_trait::async_trait;

use strata_core::{IndexRecord, Result, Vulnerability};
use strata_store::MatchConstraint;

use crate::matcher::Matcher;

/// The normalized-version kind this matcher consumes
pub const VERSION_KIND: &str = "semver";

/// Registry URI npm records carry
pub const REGISTRY_URI: &str = "https://registry.npmjs.org";

const QUERY: &[MatchConstraint] = &[
    MatchConstraint::PackageName,
    MatchConstraint::RepositoryUri,
];

fn compare_semver(a: &str, b: &str) -> Option<Ordering> {
    let a = semver::Version::parse(a).ok()?;
    let b = semver::Version::parse(b).ok()?;
    Some(a.cmp(&b))
}

/// Matcher for npm-installed packages
#[derive(Debug, Default)]
pub struct NpmMatcher;

#[async_trait]
impl Matcher for NpmMatcher {
    fn name(&self) -> &str {
        "npm"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .repository
            .as_ref()
            .map(|r| r.uri == REGISTRY_URI)
            .unwrap_or(false)
    }

    fn query(&self) -> &[MatchConstraint] {
        QUERY
    }

    async fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        let version_hit = if let Some(range) = &vuln.range {
            match &record.package.normalized_version {
                Some(nv) if nv.kind == range.kind() && nv.kind == VERSION_KIND => {
                    range.contains(nv)
                }
                _ => false,
            }
        } else if let Some(fixed) = vuln.fixed_in_version.as_deref().filter(|f| !f.is_empty()) {
            // an unparseable version cannot be shown vulnerable
            compare_semver(&record.package.version, fixed) == Some(Ordering::Less)
        } else {
            true
        };
        if !version_hit {
            return Ok(false);
        }
        Ok(vuln
            .arch_operation
            .matches(vuln.arch.as_deref(), record.package.arch.as_deref()))
    }

    fn version_filter(&self) -> Option<&str> {
        Some(VERSION_KIND)
    }

    /// The semver vector is faithful for release versions, so a store-side
    /// range hit stands on its own
    fn version_authoritative(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Package, Repository};

    fn npm_record(name: &str, version: &str) -> IndexRecord {
        IndexRecord {
            package: Package {
                name: name.into(),
                version: version.into(),
                normalized_version: strata_core::Version::from_components(
                    VERSION_KIND,
                    &[0, 7, 5, 2],
                )
                .ok(),
                ..Default::default()
            },
            distribution: None,
            repository: Some(Repository {
                name: "npm".into(),
                uri: REGISTRY_URI.into(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_filter_requires_npm_registry() {
        let matcher = NpmMatcher;
        assert!(matcher.filter(&npm_record("semver", "7.5.2")));

        let mut go_record = npm_record("semver", "7.5.2");
        go_record.repository.as_mut().unwrap().uri = "https://pkg.go.dev".into();
        assert!(!matcher.filter(&go_record));

        let mut bare = npm_record("semver", "7.5.2");
        bare.repository = None;
        assert!(!matcher.filter(&bare));
    }

    #[tokio::test]
    async fn test_vulnerable_semver_compare() {
        let matcher = NpmMatcher;
        let record = npm_record("semver", "7.5.2");
        let mut vuln = Vulnerability {
            fixed_in_version: Some("7.5.3".into()),
            ..Default::default()
        };
        assert!(matcher.vulnerable(&record, &vuln).await.unwrap());

        vuln.fixed_in_version = Some("7.5.2".into());
        assert!(!matcher.vulnerable(&record, &vuln).await.unwrap());

        vuln.fixed_in_version = Some("not-a-version".into());
        assert!(!matcher.vulnerable(&record, &vuln).await.unwrap());
    }

    #[tokio::test]
    async fn test_vulnerable_range() {
        let matcher = NpmMatcher;
        let record = npm_record("semver", "7.5.2");
        let range = strata_core::VersionRange::new(
            strata_core::Version::from_components(VERSION_KIND, &[0, 7, 0, 0]).unwrap(),
            strata_core::Version::from_components(VERSION_KIND, &[0, 7, 5, 3]).unwrap(),
        )
        .unwrap();
        let vuln = Vulnerability {
            range: Some(range),
            ..Default::default()
        };
        assert!(matcher.vulnerable(&record, &vuln).await.unwrap());
    }
}
