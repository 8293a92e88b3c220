//! The apk ecosystem
//!
//! Alpine's installed database is a stream of single-letter records; the
//! repositories file lists mirror URIs line by line. Coalescing follows the
//! OS pattern.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use strata_core::{Package, PackageKind, Repository, Result, Version};

use crate::coalesce::OsCoalescer;
use crate::ecosystem::{numeric_run_vector, osrelease::OsReleaseScanner};
use crate::registry::Ecosystem;
use crate::scanner::{LayerFs, PackageScanner, RepositoryScanner};

/// The version kind the apk matcher expects
pub const NORMALIZED_KIND: &str = "apk";

const INSTALLED_DB: &str = "lib/apk/db/installed";
const REPOSITORIES_FILE: &str = "etc/apk/repositories";

/// Lossy normalization of an Alpine version (`1.2.4-r2` style) into the
/// vector form; apk has no epoch, so slot zero is always 0.
pub fn normalized_version(raw: &str) -> Version {
    Version::new(NORMALIZED_KIND, numeric_run_vector(0, raw))
}

/// Scans `lib/apk/db/installed`
#[derive(Debug, Default)]
pub struct ApkPackageScanner;

fn parse_installed(content: &str, db: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut name = String::new();
    let mut version = String::new();
    let mut arch = None;
    let mut origin = None;

    let mut flush = |name: &mut String,
                     version: &mut String,
                     arch: &mut Option<String>,
                     origin: &mut Option<String>| {
        if !name.is_empty() && !version.is_empty() {
            let source = origin.take().map(|o| {
                Box::new(Package {
                    name: o,
                    kind: PackageKind::Source,
                    version: version.clone(),
                    normalized_version: Some(normalized_version(version)),
                    package_db: db.to_string(),
                    ..Default::default()
                })
            });
            packages.push(Package {
                name: std::mem::take(name),
                kind: PackageKind::Binary,
                normalized_version: Some(normalized_version(version)),
                version: std::mem::take(version),
                arch: arch.take(),
                package_db: db.to_string(),
                source,
                ..Default::default()
            });
        }
        name.clear();
        version.clear();
        *arch = None;
        *origin = None;
    };

    for line in content.lines() {
        if line.is_empty() {
            flush(&mut name, &mut version, &mut arch, &mut origin);
            continue;
        }
        if let Some(value) = line.strip_prefix("P:") {
            name = value.to_string();
        } else if let Some(value) = line.strip_prefix("V:") {
            version = value.to_string();
        } else if let Some(value) = line.strip_prefix("A:") {
            arch = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("o:") {
            origin = Some(value.to_string());
        }
    }
    flush(&mut name, &mut version, &mut arch, &mut origin);
    packages
}

#[async_trait]
impl PackageScanner for ApkPackageScanner {
    fn name(&self) -> &str {
        "apk"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Package>> {
        let Ok(content) = layer.read_to_string(INSTALLED_DB) else {
            return Ok(vec![]);
        };
        let packages = parse_installed(&content, INSTALLED_DB);
        debug!(count = packages.len(), "scanned apk database");
        Ok(packages)
    }
}

/// Scans `etc/apk/repositories`
#[derive(Debug, Default)]
pub struct ApkRepositoryScanner;

#[async_trait]
impl RepositoryScanner for ApkRepositoryScanner {
    fn name(&self) -> &str {
        "apk-repositories"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Repository>> {
        let Ok(content) = layer.read_to_string(REPOSITORIES_FILE) else {
            return Ok(vec![]);
        };
        let repositories = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|uri| Repository {
                name: "apk".into(),
                // tagged repositories look like "@edge https://…"
                uri: uri.split_whitespace().last().unwrap_or(uri).to_string(),
                ..Default::default()
            })
            .collect();
        Ok(repositories)
    }
}

/// The apk ecosystem bundle
pub fn ecosystem() -> Ecosystem {
    Ecosystem {
        name: "apk",
        package_scanners: vec![Arc::new(ApkPackageScanner)],
        distribution_scanners: vec![Arc::new(OsReleaseScanner)],
        repository_scanners: vec![Arc::new(ApkRepositoryScanner)],
        coalescer: Arc::new(OsCoalescer::new("apk")),
    }
}
