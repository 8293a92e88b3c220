//! Alpine matcher
//!
//! Alpine versions look like `1.2.4-r2`: dotted numerics plus a release
//! counter. Comparison is numeric part by part, release number last.

use std::cmp::Ordering;

use async_trait::async_trait;

use strata_core::{IndexRecord, Result, Vulnerability};
use strata_store::MatchConstraint;

use crate::matcher::Matcher;

/// The normalized-version kind this matcher consumes
pub const VERSION_KIND: &str = "apk";

const QUERY: &[MatchConstraint] = &[
    MatchConstraint::PackageName,
    MatchConstraint::DistributionDid,
];

/// Split a version like `1.2.4-r2` into its dotted numeric components and
/// the release counter. A component's trailing non-digits (`4a`) are
/// ignored; a missing `-rN` suffix counts as release zero.
fn decompose(v: &str) -> (Vec<u64>, u64) {
    let (base, release) = match v.rsplit_once("-r") {
        Some((base, rel)) => (base, rel.parse().unwrap_or(0)),
        None => (v, 0),
    };
    let components = base
        .split('.')
        .map(|part| {
            let digits = match part.find(|c: char| !c.is_ascii_digit()) {
                Some(end) => &part[..end],
                None => part,
            };
            digits.parse().unwrap_or(0)
        })
        .collect();
    (components, release)
}

/// Order two Alpine package versions
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (lhs, lhs_release) = decompose(a);
    let (rhs, rhs_release) = decompose(b);

    // shorter component lists compare as if zero-extended
    let width = lhs.len().max(rhs.len());
    let pad = |components: Vec<u64>| {
        components.into_iter().chain(std::iter::repeat(0)).take(width)
    };
    pad(lhs)
        .cmp(pad(rhs))
        .then(lhs_release.cmp(&rhs_release))
}

/// Matcher for apk-managed packages
#[derive(Debug, Default)]
pub struct ApkMatcher;

#[async_trait]
impl Matcher for ApkMatcher {
    fn name(&self) -> &str {
        "apk"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .map(|d| d.did == "alpine")
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
