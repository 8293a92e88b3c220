//! Persistence contract for the indexer
//!
//! The engine behind this trait is deliberately abstract: the controller
//! only relies on the guarantees spelled out here. Bulk artifact writes and
//! their `(layer, scanner)` scanned marker form the commit boundary:
//! a reader that sees the marker sees every artifact written with it.

use async_trait::async_trait;

use strata_core::{
    Digest, Distribution, IndexReport, Manifest, Package, Repository, Result, ScannerInfo,
};

/// Store operations the indexer controller drives
#[async_trait]
pub trait IndexerStore: Send + Sync {
    /// Idempotent insert of scanner identity tuples
    async fn register_scanners(&self, scanners: &[ScannerInfo]) -> Result<()>;

    /// Idempotent upsert of a manifest, its layers, and their order
    async fn persist_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// Has the manifest been scanned by at least this scanner set?
    async fn manifest_scanned(&self, hash: &Digest, scanners: &[ScannerInfo]) -> Result<bool>;

    /// Has this (layer, scanner) pair been scanned?
    async fn layer_scanned(&self, hash: &Digest, scanner: &ScannerInfo) -> Result<bool>;

    /// Idempotent marker; readers that observe it observe the artifacts
    async fn set_layer_scanned(&self, hash: &Digest, scanner: &ScannerInfo) -> Result<()>;

    /// Bulk-insert package artifacts for a (layer, scanner) pair
    async fn index_packages(
        &self,
        packages: &[Package],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()>;

    async fn index_distributions(
        &self,
        distributions: &[Distribution],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()>;

    async fn index_repositories(
        &self,
        repositories: &[Repository],
        layer: &Digest,
        scanner: &ScannerInfo,
    ) -> Result<()>;

    /// Reconstruct a layer's package artifacts, filtered to a scanner subset
    async fn packages_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Package>>;

    async fn distributions_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Distribution>>;

    async fn repositories_by_layer(
        &self,
        hash: &Digest,
        scanners: &[ScannerInfo],
    ) -> Result<Vec<Repository>>;

    /// The persisted report for a manifest, if any
    async fn index_report(&self, hash: &Digest) -> Result<Option<IndexReport>>;

    /// Upsert the report keyed by its manifest hash
    async fn set_index_report(&self, report: &IndexReport) -> Result<()>;

    /// Persist the final report and mark the manifest scanned by the set.
    /// Totally ordered with report reads: a reader observing the finished
    /// state sees this report body.
    async fn set_index_finished(
        &self,
        report: &IndexReport,
        scanners: &[ScannerInfo],
    ) -> Result<()>;

    /// Populate the manifest index from a report's records
    async fn index_manifest(&self, report: &IndexReport) -> Result<()>;

    /// Cascade-delete; returns the subset that was actually removed
    async fn delete_manifests(&self, hashes: &[Digest]) -> Result<Vec<Digest>>;

    /// All interned packages with the given name
    async fn packages_by_name(&self, name: &str) -> Result<Vec<Package>>;

    /// Resolve a stored distribution matching the query's non-empty fields
    async fn distribution_lookup(&self, query: &Distribution) -> Result<Option<Distribution>>;

    /// Resolve a stored repository matching the query's non-empty fields
    async fn repository_lookup(&self, query: &Repository) -> Result<Option<Repository>>;

    /// Manifest digests with a manifest-index row matching the given
    /// package and, when provided, distribution and repository
    async fn manifests_for(
        &self,
        package_id: &str,
        distribution_id: Option<&str>,
        repository_id: Option<&str>,
    ) -> Result<Vec<Digest>>;
}
