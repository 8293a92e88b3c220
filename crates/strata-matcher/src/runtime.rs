//! The match runtime
//!
//! Expands an index report into records, fans the configured matchers out in
//! parallel, batch-queries the vulnerability store once per matcher, applies
//! each matcher's final check, and folds the results into one
//! [`VulnerabilityReport`]. Errors are returned as errors; a report is never
//! emitted half-filled.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tracing::{debug, info};

use strata_core::{IndexRecord, IndexReport, Result, Vulnerability, VulnerabilityReport};
use strata_store::{GetOpts, VulnerabilityStore};

use crate::matcher::Matcher;

/// Hits one matcher produced: (package id, vulnerability)
type MatcherHits = Vec<(String, Vulnerability)>;

async fn run_matcher(
    store: Arc<dyn VulnerabilityStore>,
    matcher: Arc<dyn Matcher>,
    records: Arc<Vec<IndexRecord>>,
) -> Result<MatcherHits> {
    let filtered: Vec<IndexRecord> = records
        .iter()
        .filter(|r| matcher.filter(r))
        .cloned()
        .collect();
    if filtered.is_empty() {
        return Ok(Vec::new());
    }

    let opts = GetOpts {
        constraints: matcher.query().to_vec(),
        version_filter: matcher.version_filter().map(String::from),
    };
    let candidates = store.get(&filtered, &opts).await?;
    counter!("strata_matcher_queries_total").increment(1);

    let mut hits = Vec::new();
    for record in &filtered {
        let Some(vulns) = candidates.get(&record.package.id) else {
            continue;
        };
        for vuln in vulns {
            // an authoritative store-side range check needs no re-check
            let settled = matcher.version_authoritative()
                && matcher.version_filter().is_some()
                && vuln
                    .range
                    .as_ref()
                    .map(|r| Some(r.kind()) == matcher.version_filter())
                    .unwrap_or(false);
            let vulnerable = if settled {
                true
            } else {
                matcher.vulnerable(record, vuln).await?
            };
            if vulnerable {
                hits.push((record.package.id.clone(), vuln.clone()));
            }
        }
    }
    debug!(matcher = matcher.name(), hits = hits.len(), "matcher finished");
    Ok(hits)
}

/// Correlate an index report with the vulnerability store
pub async fn match_report(
    store: Arc<dyn VulnerabilityStore>,
    matchers: &[Arc<dyn Matcher>],
    report: &IndexReport,
) -> Result<VulnerabilityReport> {
    let records = Arc::new(report.index_records());
    debug!(
        manifest = %report.manifest_hash,
        records = records.len(),
        matchers = matchers.len(),
        "matching"
    );

    let per_matcher: Vec<Result<MatcherHits>> = stream::iter(matchers.iter().cloned())
        .map(|matcher| run_matcher(store.clone(), matcher, records.clone()))
        .buffer_unordered(matchers.len().max(1))
        .collect()
        .await;

    let mut out = VulnerabilityReport {
        hash: Some(report.manifest_hash.clone()),
        packages: report.packages.clone(),
        distributions: report.distributions.clone(),
        repositories: report.repositories.clone(),
        environments: report.environments.clone(),
        ..Default::default()
    };

    // dedup across matchers on (package, vulnerability)
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for hits in per_matcher {
        for (package_id, vuln) in hits? {
            if !seen.insert((package_id.clone(), vuln.id.clone())) {
                continue;
            }
            out.package_vulnerabilities
                .entry(package_id)
                .or_default()
                .push(vuln.id.clone());
            out.vulnerabilities.insert(vuln.id.clone(), vuln);
        }
    }

    info!(
        manifest = %report.manifest_hash,
        vulnerabilities = out.vulnerabilities.len(),
        "matching finished"
    );
    counter!("strata_matcher_reports_total").increment(1);
    Ok(out)
}

/// A report's vulnerability IDs ordered by normalized severity, highest
/// first; ties break on the ID for a stable order
pub fn severity_sorted_ids(report: &VulnerabilityReport) -> Vec<String> {
    let mut ids: Vec<String> = report.vulnerabilities.keys().cloned().collect();
    ids.sort_by(|a, b| {
        let sev_a = report.vulnerabilities[a].normalized_severity;
        let sev_b = report.vulnerabilities[b].normalized_severity;
        sev_b.cmp(&sev_a).then_with(|| a.cmp(b))
    });
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Severity;

    #[test]
    fn test_severity_sorted_ids() {
        let mut report = VulnerabilityReport::default();
        for (id, sev) in [
            ("1", Severity::Low),
            ("2", Severity::Critical),
            ("3", Severity::Medium),
            ("4", Severity::Critical),
        ] {
            report.vulnerabilities.insert(
                id.to_string(),
                Vulnerability {
                    id: id.to_string(),
                    normalized_severity: sev,
                    ..Default::default()
                },
            );
        }
        let hash_map_order_independent = severity_sorted_ids(&report);
        assert_eq!(hash_map_order_independent, vec!["2", "4", "3", "1"]);
    }
}
