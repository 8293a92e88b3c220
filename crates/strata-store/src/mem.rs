//! In-memory reference store
//!
//! `MemStore` implements every persistence contract in this crate plus the
//! advisory-lock protocol. It is the test substrate for the controller and
//! matcher, and the executable description of what a SQL-backed store must
//! guarantee: interned artifact rows keyed per (layer, scanner), scanned
//! markers as the commit boundary, and set-valued manifest-index rows.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use strata_cache::{LockGuard, LockSource};
use strata_core::{
    Digest, Distribution, IndexReport, Manifest, Package, PackageKind, Repository, Result,
    ScannerInfo, Vulnerability,
};

use crate::indexer::IndexerStore;
use crate::vuln::{
    GetOpts, MatchConstraint, UpdateOperation, VulnerabilityStore, VulnerabilityUpdateStore,
};

/// Identity under which a package row is interned
type PackageKey = (
    String,
    String,
    PackageKind,
    Option<String>,
    Option<String>,
    Option<(String, String)>,
);

fn package_key(pkg: &Package) -> PackageKey {
    (
        pkg.name.clone(),
        pkg.version.clone(),
        pkg.kind,
        pkg.module.clone(),
        pkg.arch.clone(),
        pkg.source
            .as_ref()
            .map(|s| (s.name.clone(), s.version.clone())),
    )
}

/// Per-artifact columns that vary by (layer, scanner) even for one package
#[derive(Debug, Clone)]
struct PackageArtifact {
    package_id: String,
    source_id: Option<String>,
    package_db: String,
    filepath: Option<String>,
    repository_hint: Option<String>,
}

#[derive(Default)]
struct Inner {
    // manifest hash -> layer digests in stacking order
    manifests: HashMap<String, Vec<Digest>>,
    scanners: HashMap<ScannerInfo, u64>,
    next_scanner_id: u64,

    scanned_layers: HashSet<(String, u64)>,
    scanned_manifests: HashMap<String, HashSet<u64>>,

    packages: HashMap<String, Package>,
    package_ids: HashMap<PackageKey, String>,
    next_package_id: u64,
    package_artifacts: HashMap<(String, u64), Vec<PackageArtifact>>,

    distributions: HashMap<String, Distribution>,
    distribution_ids: HashMap<(String, String, String, String), String>,
    next_distribution_id: u64,
    distribution_artifacts: HashMap<(String, u64), Vec<String>>,

    repositories: HashMap<String, Repository>,
    repository_ids: HashMap<(String, String, String), String>,
    next_repository_id: u64,
    repository_artifacts: HashMap<(String, u64), Vec<String>>,

    // serialized report blobs, keyed by manifest hash
    reports: HashMap<String, String>,
    // (manifest, package, dist?, repo?) rows, set-valued
    manifest_index: HashSet<(String, String, Option<String>, Option<String>)>,

    vulnerabilities: HashMap<String, Vulnerability>,
    next_vulnerability_id: u64,
    update_operations: Vec<UpdateOperation>,
    operation_vulnerabilities: HashMap<String, Vec<String>>,
}

/// The in-memory store
pub struct MemStore {
    inner: Mutex<Inner>,
    advisory: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    session: CancellationToken,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            advisory: Mutex::new(HashMap::new()),
            session: CancellationToken::new(),
        }
    }

    /// Simulate losing the backing session: every advisory lock handed out
    /// sees its cancellation token fire.
    pub fn close(&self) {
        self.session.cancel();
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store poisoned")
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn scanner_id(&self, scanner: &ScannerInfo) -> Option<u64> {
        self.scanners.get(scanner).copied()
    }

    fn intern_package(&mut self, pkg: &Package) -> String {
        let key = package_key(pkg);
        if let Some(id) = self.package_ids.get(&key) {
            return id.clone();
        }
        self.next_package_id += 1;
        let id = self.next_package_id.to_string();
        let mut row = pkg.clone();
        row.id = id.clone();
        // artifact-level columns live on the artifact row, not the package
        row.package_db = String::new();
        row.filepath = None;
        row.repository_hint = None;
        row.source = None;
        self.packages.insert(id.clone(), row);
        self.package_ids.insert(key, id.clone());
        id
    }

    fn intern_distribution(&mut self, dist: &Distribution) -> String {
        let key = dist.dedup_key();
        if let Some(id) = self.distribution_ids.get(&key) {
            return id.clone();
        }
        self.next_distribution_id += 1;
        let id = self.next_distribution_id.to_string();
        let mut row = dist.clone();
        row.id = id.clone();
        self.distributions.insert(id.clone(), row);
        self.distribution_ids.insert(key, id.clone());
        id
    }

    fn intern_repository(&mut self, repo: &Repository) -> String {
        let key = repo.dedup_key();
        if let Some(id) = self.repository_ids.get(&key) {
            return id.clone();
        }
        self.next_repository_id += 1;
        let id = self.next_repository_id.to_string();
        let mut row = repo.clone();
        row.id = id.clone();
        self.repositories.insert(id.clone(), row);
        self.repository_ids.insert(key, id.clone());
        id
    }

    fn materialize_package(&self, artifact: &PackageArtifact) -> Option<Package> {
        let mut pkg = self.packages.get(&artifact.package_id)?.clone();
        pkg.package_db = artifact.package_db.clone();
        pkg.filepath = artifact.filepath.clone();
        pkg.repository_hint = artifact.repository_hint.clone();
        if let Some(source_id) = &artifact.source_id {
            pkg.source = self.packages.get(source_id).cloned().map(Box::new);
        }
        Some(pkg)
    }
}

#[async_trait]
impl IndexerStore for MemStore {
    async fn register_scanners(&self, scanners: &[ScannerInfo]) -> Result<()> {
        let mut inner = self.lock_inner();
        for scanner in scanners {
            if !inner.scanners.contains_key(scanner) {
                inner.next_scanner_id += 1;
                let id = inner.next_scanner_id;
                inner.scanners.insert(scanner.clone(), id);
            }
        }
        Ok(())
    }

    async fn persist_manifest(&self, manifest: &Manifest) -> Result<()> {
        let mut inner = self.lock_inner();
        inner
            .manifests
            .entry(manifest.hash.to_string())
            .or_insert_with(|| manifest.layer_digests().cloned().collect());
        Ok(())
    }

    async fn manifest_scanned(&self, hash: &Digest, scanners: &[ScannerInfo]) -> Result<bool> {
        let inner = self.lock_inner();
        let Some(done) = inner.scanned_manifests.get(&hash.to_string()) else {
            return Ok(false);
        };
        for scanner in scanners {
            match inner.scanner_id(scanner) {
                Some(id) if done.contains(&id) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn layer_scanned(&self, hash: &Digest, scanner: &ScannerInfo) -> Result<bool> {
        let inner = self.lock_inner();
        let Some(id) = inner.scanner_id(scanner) else {
            return Ok(false);
        };
        Ok(inner.scanned_layers.contains(&(hash.to_string(), id)))
    }

    async fn set_layer_scanned(&self, hash: &Digest, scanner: &ScannerInfo) -> Result<()> {
        let mut inner = self.lock_inner();
        let id = inner.scanner_id(scanner).ok_or_else(|| {
            strata_core::Error::precondition(format!("scanner not registered: {scanner}"))
        })?;
        inner.scanned_layers.insert((hash.to_string(), id));
        Ok(())
    }

    async fn index_packages(
        &self,
        packages: &[Package],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        let scanner_id = inner.scanner_id(scanner).ok_or_else(|| {
            strata_core::Error::precondition(format!("scanner not registered: {scanner}"))
        })?;
        let mut rows = Vec::with_capacity(packages.len());
        for pkg in packages {
            let source_id = pkg.source.as_ref().map(|s| inner.intern_package(s));
            let package_id = inner.intern_package(pkg);
            rows.push(PackageArtifact {
                package_id,
                source_id,
                package_db: pkg.package_db.clone(),
                filepath: pkg.filepath.clone(),
                repository_hint: pkg.repository_hint.clone(),
            });
        }
        inner
            .package_artifacts
            .insert((layer.to_string(), scanner_id), rows);
        Ok(())
    }

    async fn index_distributions(
        &self,
        distributions: &[Distribution],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        let scanner_id = inner.scanner_id(scanner).ok_or_else(|| {
            strata_core::Error::precondition(format!("scanner not registered: {scanner}"))
        })?;
        let ids: Vec<String> = distributions
            .iter()
            .map(|d| inner.intern_distribution(d))
            .collect();
        inner
            .distribution_artifacts
            .insert((layer.to_string(), scanner_id), ids);
        Ok(())
    }

    async fn index_repositories(
        &self,
        repositories: &[Repository],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        let scanner_id = inner.scanner_id(scanner).ok_or_else(|| {
            strata_core::Error::precondition(format!("scanner not registered: {scanner}"))
        })?;
        let ids: Vec<String> = repositories
            .iter()
            .map(|r| inner.intern_repository(r))
            .collect();
        inner
            .repository_artifacts
            .insert((layer.to_string(), scanner_id), ids);
        Ok(())
    }

    async fn packages_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Package>> {
        let inner = self.lock_inner();
        let layer = hash.to_string();
        let mut out = Vec::new();
        for scanner in scanners {
            let Some(id) = inner.scanner_id(scanner) else {
                continue;
            };
            // artifacts are only readable once the scanned marker is set
            if !inner.scanned_layers.contains(&(layer.clone(), id)) {
                continue;
            }
            if let Some(rows) = inner.package_artifacts.get(&(layer.clone(), id)) {
                out.extend(rows.iter().filter_map(|r| inner.materialize_package(r)));
            }
        }
        Ok(out)
    }

    async fn distributions_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Distribution>> {
        let inner = self.lock_inner();
        let layer = hash.to_string();
        let mut out = Vec::new();
        for scanner in scanners {
            let Some(id) = inner.scanner_id(scanner) else {
                continue;
            };
            if !inner.scanned_layers.contains(&(layer.clone(), id)) {
                continue;
            }
            if let Some(ids) = inner.distribution_artifacts.get(&(layer.clone(), id)) {
                out.extend(ids.iter().filter_map(|i| inner.distributions.get(i)).cloned());
            }
        }
        Ok(out)
    }

    async fn repositories_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Repository>> {
        let inner = self.lock_inner();
        let layer = hash.to_string();
        let mut out = Vec::new();
        for scanner in scanners {
            let Some(id) = inner.scanner_id(scanner) else {
                continue;
            };
            if !inner.scanned_layers.contains(&(layer.clone(), id)) {
                continue;
            }
            if let Some(ids) = inner.repository_artifacts.get(&(layer.clone(), id)) {
                out.extend(ids.iter().filter_map(|i| inner.repositories.get(i)).cloned());
            }
        }
        Ok(out)
    }

    async fn index_report(&self, hash: &Digest) -> Result<Option<IndexReport>> {
        let inner = self.lock_inner();
        inner
            .reports
            .get(&hash.to_string())
            .map(|blob| serde_json::from_str(blob).map_err(Into::into))
            .transpose()
    }

    async fn set_index_report(&self, report: &IndexReport) -> Result<()> {
        let blob = serde_json::to_string(report)?;
        let mut inner = self.lock_inner();
        inner
            .reports
            .insert(report.manifest_hash.to_string(), blob);
        Ok(())
    }

    async fn set_index_finished(
        &self,
        report: &IndexReport,
        scanners: &[ScannerInfo],
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        let mut ids = HashSet::new();
        for scanner in scanners {
            let id = inner.scanner_id(scanner).ok_or_else(|| {
                strata_core::Error::precondition(format!("scanner not registered: {scanner}"))
            })?;
            ids.insert(id);
        }
        // single critical section: the finished marker and the report body
        // become visible together
        let blob = serde_json::to_string(report)?;
        inner
            .reports
            .insert(report.manifest_hash.to_string(), blob);
        inner
            .scanned_manifests
            .entry(report.manifest_hash.to_string())
            .or_default()
            .extend(ids);
        Ok(())
    }

    async fn index_manifest(&self, report: &IndexReport) -> Result<()> {
        let mut inner = self.lock_inner();
        let manifest = report.manifest_hash.to_string();
        for record in report.index_records() {
            inner.manifest_index.insert((
                manifest.clone(),
                record.package.id.clone(),
                record.distribution.map(|d| d.id),
                record.repository.map(|r| r.id),
            ));
        }
        Ok(())
    }

    async fn delete_manifests(&self, hashes: &[Digest]) -> Result<Vec<Digest>> {
        let mut inner = self.lock_inner();
        let mut deleted = Vec::new();
        for hash in hashes {
            let key = hash.to_string();
            let Some(layers) = inner.manifests.remove(&key) else {
                continue;
            };
            inner.reports.remove(&key);
            inner.scanned_manifests.remove(&key);
            inner.manifest_index.retain(|(m, _, _, _)| m != &key);

            // drop layer state no surviving manifest references
            for layer in layers {
                let still_used = inner
                    .manifests
                    .values()
                    .any(|ls| ls.contains(&layer));
                if still_used {
                    continue;
                }
                let layer_key = layer.to_string();
                inner.scanned_layers.retain(|(l, _)| l != &layer_key);
                inner.package_artifacts.retain(|(l, _), _| l != &layer_key);
                inner
                    .distribution_artifacts
                    .retain(|(l, _), _| l != &layer_key);
                inner
                    .repository_artifacts
                    .retain(|(l, _), _| l != &layer_key);
            }
            deleted.push(hash.clone());
        }
        debug!(requested = hashes.len(), deleted = deleted.len(), "deleted manifests");
        Ok(deleted)
    }

    async fn packages_by_name(&self, name: &str) -> Result<Vec<Package>> {
        let inner = self.lock_inner();
        Ok(inner
            .packages
            .values()
            .filter(|p| p.name == name)
            .cloned()
            .collect())
    }

    async fn distribution_lookup(&self, query: &Distribution) -> Result<Option<Distribution>> {
        let inner = self.lock_inner();
        // every non-empty query field must agree with the stored row
        Ok(inner
            .distributions
            .values()
            .find(|d| {
                (query.did.is_empty() || d.did == query.did)
                    && (query.name.is_empty() || d.name == query.name)
                    && (query.version.is_empty() || d.version == query.version)
                    && (query.version_code_name.is_empty()
                        || d.version_code_name == query.version_code_name)
                    && (query.version_id.is_empty() || d.version_id == query.version_id)
                    && (query.arch.is_empty() || d.arch == query.arch)
            })
            .cloned())
    }

    async fn repository_lookup(&self, query: &Repository) -> Result<Option<Repository>> {
        let inner = self.lock_inner();
        Ok(inner
            .repositories
            .values()
            .find(|r| {
                (query.name.is_empty() || r.name == query.name)
                    && (query.key.is_empty() || r.key == query.key)
                    && (query.uri.is_empty() || r.uri == query.uri)
            })
            .cloned())
    }

    async fn manifests_for(
        &self,
        package_id: &str,
        distribution_id: Option<&str>,
        repository_id: Option<&str>,
    ) -> Result<Vec<Digest>> {
        let inner = self.lock_inner();
        let mut out = HashSet::new();
        for (manifest, pkg, dist, repo) in &inner.manifest_index {
            if pkg != package_id {
                continue;
            }
            if let Some(want) = distribution_id {
                if dist.as_deref() != Some(want) {
                    continue;
                }
            }
            if let Some(want) = repository_id {
                if repo.as_deref() != Some(want) {
                    continue;
                }
            }
            out.insert(manifest.clone());
        }
        out.into_iter()
            .map(|m| m.parse::<Digest>())
            .collect::<std::result::Result<Vec<_>, _>>()
    }
}

fn constraint_holds(
    constraint: MatchConstraint,
    record: &strata_core::IndexRecord,
    vuln: &Vulnerability,
) -> bool {
    match constraint {
        MatchConstraint::PackageName => vuln.package.name == record.package.name,
        MatchConstraint::PackageModule => vuln.package.module == record.package.module,
        MatchConstraint::DistributionDid => match (&vuln.dist, &record.distribution) {
            (Some(v), Some(r)) => v.did == r.did,
            _ => false,
        },
        MatchConstraint::DistributionName => match (&vuln.dist, &record.distribution) {
            (Some(v), Some(r)) => v.name == r.name,
            _ => false,
        },
        MatchConstraint::DistributionVersionCodeName => {
            match (&vuln.dist, &record.distribution) {
                (Some(v), Some(r)) => v.version_code_name == r.version_code_name,
                _ => false,
            }
        }
        MatchConstraint::DistributionVersionId => match (&vuln.dist, &record.distribution) {
            (Some(v), Some(r)) => v.version_id == r.version_id,
            _ => false,
        },
        MatchConstraint::RepositoryName => match (&vuln.repo, &record.repository) {
            (Some(v), Some(r)) => v.name == r.name,
            _ => false,
        },
        MatchConstraint::RepositoryUri => match (&vuln.repo, &record.repository) {
            (Some(v), Some(r)) => v.uri == r.uri,
            _ => false,
        },
    }
}

#[async_trait]
impl VulnerabilityStore for MemStore {
    async fn get(
        &self,
        records: &[strata_core::IndexRecord],
        opts: &GetOpts,
    ) -> Result<HashMap<String, Vec<Vulnerability>>> {
        let inner = self.lock_inner();
        let mut out: HashMap<String, Vec<Vulnerability>> = HashMap::new();
        for record in records {
            let mut hits = Vec::new();
            for vuln in inner.vulnerabilities.values() {
                if !opts
                    .constraints
                    .iter()
                    .all(|&c| constraint_holds(c, record, vuln))
                {
                    continue;
                }
                if let Some(kind) = &opts.version_filter {
                    if let Some(range) = &vuln.range {
                        if range.kind() == kind {
                            let in_range = record
                                .package
                                .normalized_version
                                .as_ref()
                                .map(|v| &v.kind == kind && range.contains(v))
                                .unwrap_or(false);
                            if !in_range {
                                continue;
                            }
                        }
                    }
                }
                hits.push(vuln.clone());
            }
            if !hits.is_empty() {
                out.entry(record.package.id.clone()).or_default().extend(hits);
            }
        }
        Ok(out)
    }

    async fn update_operations(&self) -> Result<HashMap<String, Vec<UpdateOperation>>> {
        let inner = self.lock_inner();
        let mut out: HashMap<String, Vec<UpdateOperation>> = HashMap::new();
        for op in &inner.update_operations {
            out.entry(op.updater.clone()).or_default().push(op.clone());
        }
        for ops in out.values_mut() {
            ops.sort_by(|a, b| b.date.cmp(&a.date));
        }
        Ok(out)
    }
}

#[async_trait]
impl VulnerabilityUpdateStore for MemStore {
    async fn update_vulnerabilities(
        &self,
        updater: &str,
        fingerprint: &str,
        vulnerabilities: &[Vulnerability],
    ) -> Result<UpdateOperation> {
        let mut inner = self.lock_inner();
        let op = UpdateOperation {
            r#ref: Uuid::new_v4().to_string(),
            updater: updater.to_string(),
            fingerprint: fingerprint.to_string(),
            date: Utc::now(),
        };
        let mut introduced = Vec::with_capacity(vulnerabilities.len());
        for vuln in vulnerabilities {
            inner.next_vulnerability_id += 1;
            let id = inner.next_vulnerability_id.to_string();
            let mut row = vuln.clone();
            row.id = id.clone();
            row.updater = updater.to_string();
            inner.vulnerabilities.insert(id.clone(), row);
            introduced.push(id);
        }
        inner
            .operation_vulnerabilities
            .insert(op.r#ref.clone(), introduced);
        inner.update_operations.push(op.clone());
        debug!(updater, count = vulnerabilities.len(), "recorded update operation");
        Ok(op)
    }

    async fn delete_update_operations(&self, refs: &[String]) -> Result<u64> {
        let mut inner = self.lock_inner();
        let mut removed = 0u64;
        for r in refs {
            let Some(vuln_ids) = inner.operation_vulnerabilities.remove(r) else {
                continue;
            };
            for id in vuln_ids {
                inner.vulnerabilities.remove(&id);
            }
            inner.update_operations.retain(|op| &op.r#ref != r);
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl LockSource for MemStore {
    async fn lock(&self, key: &str) -> Result<LockGuard> {
        let slot = {
            let mut advisory = self.advisory.lock().expect("advisory map poisoned");
            advisory.retain(|_, s| Arc::strong_count(s) > 1);
            advisory
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let held = slot.lock_owned().await;
        Ok(LockGuard::new(self.session.child_token(), Box::new(held)))
    }

    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let slot = {
            let mut advisory = self.advisory.lock().expect("advisory map poisoned");
            advisory.retain(|_, s| Arc::strong_count(s) > 1);
            advisory
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        match slot.try_lock_owned() {
            Ok(held) => Ok(Some(LockGuard::new(
                self.session.child_token(),
                Box::new(held),
            ))),
            Err(_) => Ok(None),
        }
    }
}
