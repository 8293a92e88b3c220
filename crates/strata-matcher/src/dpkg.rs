//! Debian/Ubuntu matcher
//!
//! Debian versions are `[epoch:]upstream[-revision]`. A version body is
//! tokenized into runs that alternate between digits and everything else;
//! digit runs compare numerically, the rest bytewise, and a version that is
//! a strict prefix of another sorts first. Ranges in the `dpkg` vector kind
//! narrow candidates, but the vector is lossy, so this comparator always
//! has the last word.

use std::cmp::Ordering;

use async_trait::async_trait;

use strata_core::{IndexRecord, Result, Vulnerability};
use strata_store::MatchConstraint;

use crate::matcher::Matcher;

/// The normalized-version kind this matcher consumes
pub const VERSION_KIND: &str = "dpkg";

const QUERY: &[MatchConstraint] = &[
    MatchConstraint::PackageName,
    MatchConstraint::DistributionDid,
];

/// One maximal run of a version body
#[derive(Debug)]
enum Segment {
    Number(u64),
    Text(String),
}

impl Segment {
    fn rank(lhs: &Self, rhs: &Self) -> Ordering {
        match (lhs, rhs) {
            (Self::Number(x), Self::Number(y)) => x.cmp(y),
            (Self::Text(x), Self::Text(y)) => x.cmp(y),
            // a digit run against a non-digit suffix: the numeric side
            // sorts first
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

fn segments(body: &str) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    for c in body.chars() {
        let digit = c.is_ascii_digit();
        let extended = match out.last_mut() {
            Some(Segment::Number(n)) if digit => {
                *n = n.saturating_mul(10).saturating_add(c as u64 - '0' as u64);
                true
            }
            Some(Segment::Text(t)) if !digit => {
                t.push(c);
                true
            }
            _ => false,
        };
        if !extended {
            out.push(if digit {
                Segment::Number(c as u64 - '0' as u64)
            } else {
                Segment::Text(c.to_string())
            });
        }
    }
    out
}

fn split_epoch(v: &str) -> (u64, &str) {
    match v.split_once(':') {
        Some((epoch, body)) => (epoch.parse().unwrap_or(0), body),
        None => (0, v),
    }
}

/// Order two Debian package versions
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, body_a) = split_epoch(a);
    let (epoch_b, body_b) = split_epoch(b);
    epoch_a.cmp(&epoch_b).then_with(|| {
        let lhs = segments(body_a);
        let rhs = segments(body_b);
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            let ord = Segment::rank(l, r);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        lhs.len().cmp(&rhs.len())
    })
}

/// Matcher for dpkg-managed packages
#[derive(Debug, Default)]
pub struct DpkgMatcher;

#[async_trait]
impl Matcher for DpkgMatcher {
    fn name(&self) -> &str {
        "dpkg"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .map(|d| matches!(d.did.as_str(), "debian" | "ubuntu"))
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
            compare_versions(&record.package.version, fixed) == Ordering::Less
        } else {
            // no fix and no range: the advisory covers every version
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Distribution, Package};

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0", "2.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1:1.0.0", "1.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-1", "1.0.0-2"), Ordering::Less);
        // numeric segments compare numerically, not bytewise
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(
            compare_versions("5.0-6ubuntu1.1", "5.0-6ubuntu1.2"),
            Ordering::Less
        );
        // the epoch outranks any body difference
        assert_eq!(compare_versions("2:0.1", "1:9.9"), Ordering::Greater);
        // a strict prefix sorts first
        assert_eq!(compare_versions("1.0", "1.0a"), Ordering::Less);
    }

    #[test]
    fn test_filter_requires_debian_family() {
        let matcher = DpkgMatcher;
        let mut record = IndexRecord {
            package: Package::default(),
            distribution: Some(Distribution {
                did: "ubuntu".into(),
                ..Default::default()
            }),
            repository: None,
        };
        assert!(matcher.filter(&record));

        record.distribution.as_mut().unwrap().did = "alpine".into();
        assert!(!matcher.filter(&record));

        record.distribution = None;
        assert!(!matcher.filter(&record));
    }

    #[tokio::test]
    async fn test_vulnerable_fixed_in_version() {
        let matcher = DpkgMatcher;
        let record = IndexRecord {
            package: Package {
                name: "bash".into(),
                version: "5.0-6ubuntu1.1".into(),
                ..Default::default()
            },
            distribution: None,
            repository: None,
        };
        let mut vuln = Vulnerability {
            name: "CVE-2019-18276".into(),
            fixed_in_version: Some("5.0-6ubuntu1.2".into()),
            ..Default::default()
        };
        assert!(matcher.vulnerable(&record, &vuln).await.unwrap());

        vuln.fixed_in_version = Some("5.0-6ubuntu1.1".into());
        assert!(!matcher.vulnerable(&record, &vuln).await.unwrap());
    }

    #[tokio::test]
    async fn test_vulnerable_arch_gate() {
        let matcher = DpkgMatcher;
        let record = IndexRecord {
            package: Package {
                name: "bash".into(),
                version: "5.0-1".into(),
                arch: Some("amd64".into()),
                ..Default::default()
            },
            distribution: None,
            repository: None,
        };
        let vuln = Vulnerability {
            fixed_in_version: Some("5.0-2".into()),
            arch: Some("s390x".into()),
            ..Default::default()
        };
        assert!(!matcher.vulnerable(&record, &vuln).await.unwrap());
    }

    #[tokio::test]
    async fn test_vulnerable_unfixed_advisory_matches_all() {
        let matcher = DpkgMatcher;
        let record = IndexRecord {
            package: Package {
                name: "bash".into(),
                version: "5.0-1".into(),
                ..Default::default()
            },
            distribution: None,
            repository: None,
        };
        let vuln = Vulnerability::default();
        assert!(matcher.vulnerable(&record, &vuln).await.unwrap());
    }
}
