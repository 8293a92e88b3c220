//! Reverse lookup: which manifests does a vulnerability touch?
//!
//! The inverse of forward matching, run when a fresh advisory arrives:
//! resolve the advisory's distribution/repository scope against what the
//! indexer has seen, test every package with the advisory's name through
//! the same `vulnerable` predicate forward matching uses, and union the
//! manifest-index rows of the records that hit.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use strata_core::{Digest, IndexRecord, Result, Vulnerability};
use strata_store::IndexerStore;

use crate::matcher::Matcher;

/// All manifest digests whose indexed packages the vulnerability affects
pub async fn affected_manifests(
    store: &dyn IndexerStore,
    matchers: &[Arc<dyn Matcher>],
    vuln: &Vulnerability,
) -> Result<Vec<Digest>> {
    // the proto record: the advisory's scope resolved to stored rows
    let dist = match &vuln.dist {
        Some(d) if !d.is_empty() => store.distribution_lookup(d).await?,
        _ => None,
    };
    let repo = match &vuln.repo {
        Some(r) => store.repository_lookup(r).await?,
        None => None,
    };
    if dist.is_none() && repo.is_none() {
        // nothing indexable to anchor on
        debug!(vuln = %vuln.name, "advisory scope resolves to nothing indexed");
        return Ok(Vec::new());
    }

    let candidates = store.packages_by_name(&vuln.package.name).await?;
    let mut manifests: BTreeSet<Digest> = BTreeSet::new();

    for package in candidates {
        let record = IndexRecord {
            package,
            distribution: dist.clone(),
            repository: repo.clone(),
        };
        for matcher in matchers {
            if !matcher.filter(&record) {
                continue;
            }
            if !matcher.vulnerable(&record, vuln).await? {
                continue;
            }
            let hits = store
                .manifests_for(
                    &record.package.id,
                    dist.as_ref().map(|d| d.id.as_str()),
                    repo.as_ref().map(|r| r.id.as_str()),
                )
                .await?;
            manifests.extend(hits);
            break;
        }
    }

    debug!(
        vuln = %vuln.name,
        manifests = manifests.len(),
        "affected-manifests resolved"
    );
    Ok(manifests.into_iter().collect())
}
