//! Ecosystem bundles and the scanner registry
//!
//! An ecosystem groups the scanners that feed one coalescer. The registry is
//! built once at startup and read-only afterwards; the indexer owns an
//! `Arc<ScannerRegistry>` and never mutates it.

use std::collections::HashSet;
use std::sync::Arc;

use strata_core::ScannerInfo;

use crate::ecosystem;
use crate::scanner::{Coalescer, DistributionScanner, PackageScanner, RepositoryScanner};

/// The scanners and coalescer of one package ecosystem
#[derive(Clone)]
pub struct Ecosystem {
    pub name: &'static str,
    pub package_scanners: Vec<Arc<dyn PackageScanner>>,
    pub distribution_scanners: Vec<Arc<dyn DistributionScanner>>,
    pub repository_scanners: Vec<Arc<dyn RepositoryScanner>>,
    pub coalescer: Arc<dyn Coalescer>,
}

impl Ecosystem {
    /// Identity tuples of this ecosystem's persisted (artifact-producing)
    /// scanners
    pub fn scanner_infos(&self) -> Vec<ScannerInfo> {
        let mut infos = Vec::new();
        infos.extend(self.package_scanners.iter().map(|s| s.info()));
        infos.extend(self.distribution_scanners.iter().map(|s| s.info()));
        infos.extend(self.repository_scanners.iter().map(|s| s.info()));
        infos
    }

    pub fn package_scanner_infos(&self) -> Vec<ScannerInfo> {
        self.package_scanners.iter().map(|s| s.info()).collect()
    }

    pub fn distribution_scanner_infos(&self) -> Vec<ScannerInfo> {
        self.distribution_scanners.iter().map(|s| s.info()).collect()
    }

    pub fn repository_scanner_infos(&self) -> Vec<ScannerInfo> {
        self.repository_scanners.iter().map(|s| s.info()).collect()
    }
}

/// Write-once collection of configured ecosystems
pub struct ScannerRegistry {
    ecosystems: Vec<Ecosystem>,
}

impl ScannerRegistry {
    pub fn new(ecosystems: Vec<Ecosystem>) -> Self {
        Self { ecosystems }
    }

    /// The built-in ecosystems: dpkg, apk, and npm
    pub fn defaults() -> Self {
        Self::new(vec![
            ecosystem::dpkg::ecosystem(),
            ecosystem::apk::ecosystem(),
            ecosystem::npm::ecosystem(),
        ])
    }

    pub fn ecosystems(&self) -> &[Ecosystem] {
        &self.ecosystems
    }

    /// All persisted scanner identities across ecosystems, deduplicated:
    /// the configured scanner set
    pub fn scanner_infos(&self) -> Vec<ScannerInfo> {
        let mut seen = HashSet::new();
        let mut infos = Vec::new();
        for eco in &self.ecosystems {
            for info in eco.scanner_infos() {
                if seen.insert(info.clone()) {
                    infos.push(info);
                }
            }
        }
        infos
    }

    /// Distinct package scanners across ecosystems
    pub fn package_scanners(&self) -> Vec<Arc<dyn PackageScanner>> {
        let mut seen = HashSet::new();
        let mut out: Vec<Arc<dyn PackageScanner>> = Vec::new();
        for eco in &self.ecosystems {
            for scanner in &eco.package_scanners {
                if seen.insert(scanner.info()) {
                    out.push(scanner.clone());
                }
            }
        }
        out
    }

    pub fn distribution_scanners(&self) -> Vec<Arc<dyn DistributionScanner>> {
        let mut seen = HashSet::new();
        let mut out: Vec<Arc<dyn DistributionScanner>> = Vec::new();
        for eco in &self.ecosystems {
            for scanner in &eco.distribution_scanners {
                if seen.insert(scanner.info()) {
                    out.push(scanner.clone());
                }
            }
        }
        out
    }

    pub fn repository_scanners(&self) -> Vec<Arc<dyn RepositoryScanner>> {
        let mut seen = HashSet::new();
        let mut out: Vec<Arc<dyn RepositoryScanner>> = Vec::new();
        for eco in &self.ecosystems {
            for scanner in &eco.repository_scanners {
                if seen.insert(scanner.info()) {
                    out.push(scanner.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_three_ecosystems() {
        let registry = ScannerRegistry::defaults();
        let names: Vec<_> = registry.ecosystems().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["dpkg", "apk", "npm"]);
    }

    #[test]
    fn test_shared_scanners_dedup() {
        // dpkg and apk share the os-release distribution scanner; the
        // flattened set must carry it once
        let registry = ScannerRegistry::defaults();
        let dist = registry.distribution_scanners();
        assert_eq!(dist.len(), 1);

        let infos = registry.scanner_infos();
        let mut unique = infos.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(infos.len(), unique.len());
    }
}
