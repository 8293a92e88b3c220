//! Index and vulnerability reports
//!
//! The index report is the whole-image inventory the indexer produces; the
//! vulnerability report is the matcher's correlation of that inventory with
//! known advisories. Both are JSON-serializable and keyed by stable,
//! store-assigned string IDs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::distribution::Distribution;
use crate::package::Package;
use crate::repository::Repository;
use crate::vulnerability::Vulnerability;

/// States of the per-manifest indexing state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    #[default]
    CheckManifest,
    FetchLayers,
    ScanLayers,
    Coalesce,
    IndexManifest,
    IndexFinished,
    IndexError,
}

impl IndexState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::IndexFinished | Self::IndexError)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CheckManifest => "CheckManifest",
            Self::FetchLayers => "FetchLayers",
            Self::ScanLayers => "ScanLayers",
            Self::Coalesce => "Coalesce",
            Self::IndexManifest => "IndexManifest",
            Self::IndexFinished => "IndexFinished",
            Self::IndexError => "IndexError",
        };
        f.write_str(s)
    }
}

/// How a package appeared in the image: its database, the first layer it
/// showed up in, and its active distribution and repositories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub package_db: String,
    pub introduced_in: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_id: Option<String>,
    #[serde(default)]
    pub repository_ids: Vec<String>,
}

/// The deduplicated whole-image inventory for one manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub manifest_hash: Digest,
    pub state: IndexState,
    #[serde(default)]
    pub packages: HashMap<String, Package>,
    #[serde(default)]
    pub distributions: HashMap<String, Distribution>,
    #[serde(default)]
    pub repositories: HashMap<String, Repository>,
    /// Keyed by package ID; every key must also appear in `packages`
    #[serde(default)]
    pub environments: HashMap<String, Vec<Environment>>,
    pub success: bool,
    #[serde(default)]
    pub err: String,
}

impl IndexReport {
    pub fn new(manifest_hash: Digest) -> Self {
        Self {
            manifest_hash,
            state: IndexState::CheckManifest,
            packages: HashMap::new(),
            distributions: HashMap::new(),
            repositories: HashMap::new(),
            environments: HashMap::new(),
            success: false,
            err: String::new(),
        }
    }

    /// Set-union another (partial) report into this one.
    ///
    /// IDs are issued per-store from distinct sequences, so collisions
    /// between ecosystems cannot happen; a colliding key simply overwrites
    /// with an equal value.
    pub fn merge(&mut self, other: IndexReport) {
        self.packages.extend(other.packages);
        self.distributions.extend(other.distributions);
        self.repositories.extend(other.repositories);
        for (pkg_id, envs) in other.environments {
            let slot = self.environments.entry(pkg_id).or_default();
            for env in envs {
                if !slot.contains(&env) {
                    slot.push(env);
                }
            }
        }
    }

    /// Expand into one record per `(package, distribution?, repository?)`
    /// triple, following the environment mapping. Duplicate triples collapse.
    pub fn index_records(&self) -> Vec<IndexRecord> {
        let mut seen: HashSet<(String, Option<String>, Option<String>)> = HashSet::new();
        let mut records = Vec::new();
        for (pkg_id, envs) in &self.environments {
            let Some(package) = self.packages.get(pkg_id) else {
                continue;
            };
            for env in envs {
                let dist = env
                    .distribution_id
                    .as_ref()
                    .and_then(|id| self.distributions.get(id));
                let repo_slots: Vec<Option<&Repository>> = if env.repository_ids.is_empty() {
                    vec![None]
                } else {
                    env.repository_ids
                        .iter()
                        .map(|id| self.repositories.get(id))
                        .collect()
                };
                for repo in repo_slots {
                    let key = (
                        pkg_id.clone(),
                        dist.map(|d| d.id.clone()),
                        repo.map(|r| r.id.clone()),
                    );
                    if seen.insert(key) {
                        records.push(IndexRecord {
                            package: package.clone(),
                            distribution: dist.cloned(),
                            repository: repo.cloned(),
                        });
                    }
                }
            }
        }
        records
    }
}

/// The matcher's unit of work: one package in one environment slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub package: Package,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
}

/// Correlation of an index report with known vulnerabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub hash: Option<Digest>,
    #[serde(default)]
    pub packages: HashMap<String, Package>,
    #[serde(default)]
    pub distributions: HashMap<String, Distribution>,
    #[serde(default)]
    pub repositories: HashMap<String, Repository>,
    #[serde(default)]
    pub environments: HashMap<String, Vec<Environment>>,
    #[serde(default)]
    pub vulnerabilities: HashMap<String, Vulnerability>,
    /// Package ID to the vulnerability IDs it is affected by
    #[serde(default)]
    pub package_vulnerabilities: HashMap<String, Vec<String>>,
}
