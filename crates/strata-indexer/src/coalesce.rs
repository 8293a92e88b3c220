//! Coalescers: stacking per-layer artifacts into one inventory
//!
//! Two canonical patterns cover the built-in ecosystems. The OS pattern
//! (dpkg, apk) trusts the topmost package database and walks down to find
//! where each surviving package first appeared. The language pattern (npm)
//! keys on the package's filepath, where an upper layer genuinely replaces a
//! lower one only when name or version changed. Whiteouts from upper layers
//! are applied to lower layers before either pattern runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use strata_core::{Digest, Environment, IndexReport, Package, Repository, Result};
use strata_tarfs::whiteout;

use crate::scanner::{Coalescer, LayerArtifacts};

/// Mask lower-layer packages whose database or filepath a higher layer has
/// whited out
fn apply_whiteouts(layers: &[LayerArtifacts]) -> Vec<LayerArtifacts> {
    let mut masked: Vec<LayerArtifacts> = layers.to_vec();
    for i in 0..masked.len() {
        let mut covered: Vec<String> = Vec::new();
        for upper in layers.iter().skip(i + 1) {
            for wh in &upper.whiteouts {
                if let Some(target) = whiteout::target(wh) {
                    covered.push(target);
                }
            }
        }
        if covered.is_empty() {
            continue;
        }
        masked[i].packages.retain(|pkg| {
            let db_covered = covered.iter().any(|c| whiteout::covers(c, &pkg.package_db));
            let file_covered = pkg
                .filepath
                .as_ref()
                .map(|f| covered.iter().any(|c| whiteout::covers(c, f)))
                .unwrap_or(false);
            !(db_covered || file_covered)
        });
    }
    masked
}

/// Repositories of the nearest layer at or below `idx` that has any
fn nearest_repositories(layers: &[LayerArtifacts], idx: usize) -> Vec<Repository> {
    layers[..=idx]
        .iter()
        .rev()
        .find(|l| !l.repositories.is_empty())
        .map(|l| l.repositories.clone())
        .unwrap_or_default()
}

fn attach_package(
    report: &mut IndexReport,
    pkg: &Package,
    introduced_in: &Digest,
    distribution_id: Option<String>,
    repositories: &[Repository],
) {
    let mut repository_ids = Vec::new();
    for repo in repositories {
        repository_ids.push(repo.id.clone());
        report.repositories.insert(repo.id.clone(), repo.clone());
    }
    report.packages.insert(pkg.id.clone(), pkg.clone());
    report.environments.entry(pkg.id.clone()).or_default().push(Environment {
        package_db: pkg.package_db.clone(),
        introduced_in: introduced_in.clone(),
        distribution_id,
        repository_ids,
    });
}

/// Coalescer for operating-system package databases
pub struct OsCoalescer {
    name: String,
}

impl OsCoalescer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Coalescer for OsCoalescer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn coalesce(
        &self,
        manifest_hash: &Digest,
        layers: &[LayerArtifacts],
    ) -> Result<IndexReport> {
        let mut report = IndexReport::new(manifest_hash.clone());
        let masked = apply_whiteouts(layers);

        // the topmost layer with a package database holds the final state
        let Some(top) = masked.iter().rposition(|l| !l.packages.is_empty()) else {
            return Ok(report);
        };

        // most recent non-empty distribution wins
        let dist = masked
            .iter()
            .rev()
            .find_map(|l| l.distributions.iter().find(|d| !d.is_empty()).cloned());
        let dist_id = dist.as_ref().map(|d| d.id.clone());
        if let Some(d) = dist {
            report.distributions.insert(d.id.clone(), d);
        }

        let mut seen = HashSet::new();
        for pkg in &masked[top].packages {
            let key = pkg.dedup_key();
            if !seen.insert(key.clone()) {
                continue;
            }
            // walk down while the identical package is present; the lowest
            // layer of that run introduced the final form
            let mut introduced = top;
            for i in (0..top).rev() {
                let present = masked[i].packages.iter().any(|p| p.dedup_key() == key);
                if present {
                    introduced = i;
                } else {
                    break;
                }
            }
            let repos = nearest_repositories(&masked, introduced);
            attach_package(
                &mut report,
                pkg,
                &masked[introduced].layer,
                dist_id.clone(),
                &repos,
            );
        }

        debug!(
            ecosystem = %self.name,
            packages = report.packages.len(),
            "coalesced OS package database"
        );
        Ok(report)
    }
}

/// Coalescer for language ecosystems with one package per filepath
pub struct LanguageCoalescer {
    name: String,
}

impl LanguageCoalescer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Coalescer for LanguageCoalescer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn coalesce(
        &self,
        manifest_hash: &Digest,
        layers: &[LayerArtifacts],
    ) -> Result<IndexReport> {
        let mut report = IndexReport::new(manifest_hash.clone());
        let masked = apply_whiteouts(layers);

        // filepath -> (layer index, package); bottom-up walk so an upper
        // layer decides whether it replaces or merely carries forward
        let mut chosen: HashMap<String, (usize, Package)> = HashMap::new();
        for (i, layer) in masked.iter().enumerate() {
            for pkg in &layer.packages {
                let Some(filepath) = pkg.filepath.clone() else {
                    continue;
                };
                match chosen.get(&filepath) {
                    Some((_, held)) if held.name == pkg.name && held.version == pkg.version => {
                        // carried forward: the lower layer stays the origin
                    }
                    _ => {
                        chosen.insert(filepath, (i, pkg.clone()));
                    }
                }
            }
        }

        for (introduced, pkg) in chosen.into_values() {
            let repos = nearest_repositories(&masked, introduced);
            attach_package(&mut report, &pkg, &masked[introduced].layer, None, &repos);
        }

        debug!(
            ecosystem = %self.name,
            packages = report.packages.len(),
            "coalesced language packages"
        );
        Ok(report)
    }
}
