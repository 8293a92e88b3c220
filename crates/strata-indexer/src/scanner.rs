//! Scanner plugin model
//!
//! Four plugin kinds share the `(name, version, kind)` identity scheme:
//! package, distribution, and repository scanners read one layer each, and a
//! coalescer folds per-layer artifacts into a whole-image report. Plugins
//! are side-effect-free on the layer and safe to invoke concurrently across
//! layers; bumping a plugin's version invalidates its persisted artifacts.

use async_trait::async_trait;

use strata_core::{
    Algorithm, Digest, Distribution, IndexReport, Package, Repository, Result, ScannerInfo,
    ScannerKind,
};
use strata_tarfs::TarFs;

/// The concrete filesystem type scanners receive: a layer blob on disk
pub type LayerFs = TarFs<std::fs::File>;

/// Finds packages in one layer
#[async_trait]
pub trait PackageScanner: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name(), self.version(), ScannerKind::Package)
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Package>>;
}

/// Finds the operating-system distribution in one layer
#[async_trait]
pub trait DistributionScanner: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name(), self.version(), ScannerKind::Distribution)
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Distribution>>;
}

/// Finds configured package repositories in one layer
#[async_trait]
pub trait RepositoryScanner: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name(), self.version(), ScannerKind::Repository)
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Repository>>;
}

/// One layer's artifacts as input to coalescing, in manifest order
#[derive(Debug, Clone)]
pub struct LayerArtifacts {
    pub layer: Digest,
    pub packages: Vec<Package>,
    pub distributions: Vec<Distribution>,
    pub repositories: Vec<Repository>,
    /// Whiteout entry paths observed in this layer
    pub whiteouts: Vec<String>,
}

impl LayerArtifacts {
    pub fn new(layer: Digest) -> Self {
        Self {
            layer,
            packages: Vec::new(),
            distributions: Vec::new(),
            repositories: Vec::new(),
            whiteouts: Vec::new(),
        }
    }
}

/// Stacks per-layer artifacts into a partial index report
#[async_trait]
pub trait Coalescer: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name(), self.version(), ScannerKind::Coalescer)
    }

    /// `layers` is in manifest (bottom-to-top) order
    async fn coalesce(&self, manifest_hash: &Digest, layers: &[LayerArtifacts])
        -> Result<IndexReport>;
}

/// The canonical digest of a configured scanner set.
///
/// Scanner identity tuples are sorted bytewise by (name, version, kind) and
/// hashed as `name\0version\0kind\n` lines; the result is what "scanned by
/// this exact set" is keyed on, so the canonicalization must stay stable
/// across releases.
pub fn scanner_set_digest(scanners: &[ScannerInfo]) -> Digest {
    let mut sorted: Vec<&ScannerInfo> = scanners.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut hasher = Algorithm::Sha256.hasher();
    for scanner in sorted {
        hasher.update(scanner.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(scanner.version.as_bytes());
        hasher.update(b"\0");
        hasher.update(scanner.kind.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, version: &str) -> ScannerInfo {
        ScannerInfo::new(name, version, ScannerKind::Package)
    }

    #[test]
    fn test_scanner_set_digest_order_independent() {
        let a = [info("dpkg", "1"), info("apk", "1"), info("npm", "2")];
        let b = [info("npm", "2"), info("dpkg", "1"), info("apk", "1")];
        assert_eq!(scanner_set_digest(&a), scanner_set_digest(&b));
    }

    #[test]
    fn test_scanner_set_digest_sensitive_to_version() {
        let a = [info("dpkg", "1")];
        let b = [info("dpkg", "2")];
        assert_ne!(scanner_set_digest(&a), scanner_set_digest(&b));
    }

    #[test]
    fn test_scanner_set_digest_collapses_duplicates() {
        let a = [info("dpkg", "1"), info("dpkg", "1")];
        let b = [info("dpkg", "1")];
        assert_eq!(scanner_set_digest(&a), scanner_set_digest(&b));
    }
}
