//! The npm ecosystem
//!
//! Walks installed `node_modules` trees and reads each module's
//! `package.json`. One package per filepath, so coalescing follows the
//! language pattern.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use strata_core::{Package, PackageKind, Repository, Result, Version};

use crate::coalesce::LanguageCoalescer;
use crate::registry::Ecosystem;
use crate::scanner::{LayerFs, PackageScanner, RepositoryScanner};

/// The version kind the npm matcher expects
pub const NORMALIZED_KIND: &str = "semver";

/// The registry URI npm records are correlated against
pub const REGISTRY_URI: &str = "https://registry.npmjs.org";

/// Normalize a semver string into the vector form; pre-release and build
/// metadata are dropped.
pub fn normalized_version(raw: &str) -> Option<Version> {
    let parsed = semver::Version::parse(raw).ok()?;
    let clamp = |n: u64| n.min(i32::MAX as u64) as i32;
    Version::from_components(
        NORMALIZED_KIND,
        &[0, clamp(parsed.major), clamp(parsed.minor), clamp(parsed.patch)],
    )
    .ok()
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
}

/// `some/dir/node_modules/<name>/package.json` (or the `@scope/<name>`
/// variant) → the `node_modules` root it belongs to
fn module_root(path: &str) -> Option<&str> {
    let rest = path.strip_suffix("/package.json").or_else(|| {
        if path == "package.json" {
            Some("")
        } else {
            None
        }
    })?;
    let idx = rest.rfind("node_modules/")?;
    let module = &rest[idx + "node_modules/".len()..];
    let depth = module.split('/').count();
    let well_formed = match depth {
        1 => !module.is_empty(),
        2 => module.starts_with('@'),
        _ => false,
    };
    if !well_formed {
        return None;
    }
    Some(path[..idx + "node_modules".len()].trim_end_matches('/'))
}

/// Scans installed node_modules trees
#[derive(Debug, Default)]
pub struct NpmPackageScanner;

#[async_trait]
impl PackageScanner for NpmPackageScanner {
    fn name(&self) -> &str {
        "npm"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Package>> {
        let candidates: Vec<(String, String)> = layer
            .paths()
            .filter_map(|p| module_root(p).map(|root| (p.to_string(), root.to_string())))
            .collect();

        let mut packages = Vec::new();
        for (path, root) in candidates {
            let Ok(content) = layer.open(&path) else {
                continue;
            };
            let parsed: PackageJson = match serde_json::from_slice(&content) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %path, error = %e, "unparseable package.json, skipping");
                    continue;
                }
            };
            let (Some(name), Some(version)) = (parsed.name, parsed.version) else {
                continue;
            };
            packages.push(Package {
                name,
                kind: PackageKind::Binary,
                normalized_version: normalized_version(&version),
                version,
                package_db: root,
                filepath: Some(path),
                repository_hint: Some(REGISTRY_URI.into()),
                ..Default::default()
            });
        }
        debug!(count = packages.len(), "scanned node_modules trees");
        Ok(packages)
    }
}

/// Reports the npm registry for layers that carry node_modules
#[derive(Debug, Default)]
pub struct NpmRepositoryScanner;

#[async_trait]
impl RepositoryScanner for NpmRepositoryScanner {
    fn name(&self) -> &str {
        "npm-repository"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Repository>> {
        let has_modules = layer.paths().any(|p| module_root(p).is_some());
        if !has_modules {
            return Ok(vec![]);
        }
        Ok(vec![Repository {
            name: "npm".into(),
            uri: REGISTRY_URI.into(),
            ..Default::default()
        }])
    }
}

/// The npm ecosystem bundle
pub fn ecosystem() -> Ecosystem {
    Ecosystem {
        name: "npm",
        package_scanners: vec![Arc::new(NpmPackageScanner)],
        distribution_scanners: vec![],
        repository_scanners: vec![Arc::new(NpmRepositoryScanner)],
        coalescer: Arc::new(LanguageCoalescer::new("npm")),
    }
}
