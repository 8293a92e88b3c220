//! The dpkg ecosystem
//!
//! Parses Debian/Ubuntu package databases out of a layer: the classic
//! `var/lib/dpkg/status` file plus the per-package `status.d` fragments that
//! distroless images ship. Coalescing follows the OS pattern.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use strata_core::{Package, PackageKind, Result, Version};

use crate::coalesce::OsCoalescer;
use crate::ecosystem::{numeric_run_vector, osrelease::OsReleaseScanner};
use crate::registry::Ecosystem;
use crate::scanner::{LayerFs, PackageScanner};

/// The version kind the dpkg matcher expects
pub const NORMALIZED_KIND: &str = "dpkg";

const STATUS_PATH: &str = "var/lib/dpkg/status";
const STATUS_D_DIR: &str = "var/lib/dpkg/status.d";

/// Lossy normalization of a Debian version into the ten-slot vector:
/// the epoch, then the numeric runs of upstream version and revision.
///
/// `1:5.0-6ubuntu1.1` becomes `dpkg:1.5.0.6.1.1.0.0.0.0`. Non-numeric
/// separators (`~`, letters) are dropped, so ordering of the vector is an
/// approximation; matchers must re-check with the real dpkg comparator.
pub fn normalized_version(raw: &str) -> Version {
    let (epoch, rest) = match raw.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, raw),
    };
    Version::new(NORMALIZED_KIND, numeric_run_vector(epoch, rest))
}

/// Scans dpkg status databases
#[derive(Debug, Default)]
pub struct DpkgPackageScanner;

fn parse_status(content: &str, db: &str, require_installed: bool) -> Vec<Package> {
    let mut packages = Vec::new();
    for paragraph in content.split("\n\n") {
        let mut name = None;
        let mut version = None;
        let mut arch = None;
        let mut source = None;
        let mut installed = !require_installed;
        for line in paragraph.lines() {
            if line.starts_with(' ') {
                // continuation of a multi-line field
                continue;
            }
            if let Some(value) = line.strip_prefix("Package: ") {
                name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Version: ") {
                version = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Architecture: ") {
                arch = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Source: ") {
                source = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Status: ") {
                installed = value.contains("installed") && !value.contains("not-installed");
            }
        }
        let (Some(name), Some(version)) = (name, version) else {
            continue;
        };
        if !installed {
            continue;
        }

        // "Source: name (version)" pins the source version; bare names
        // share the binary version
        let source_pkg = source.map(|s| {
            let (src_name, src_version) = match s.split_once('(') {
                Some((n, v)) => (
                    n.trim().to_string(),
                    v.trim_end_matches(')').trim().to_string(),
                ),
                None => (s.trim().to_string(), version.clone()),
            };
            Box::new(Package {
                name: src_name,
                kind: PackageKind::Source,
                normalized_version: Some(normalized_version(&src_version)),
                version: src_version,
                package_db: db.to_string(),
                ..Default::default()
            })
        });

        packages.push(Package {
            name,
            kind: PackageKind::Binary,
            normalized_version: Some(normalized_version(&version)),
            version,
            arch,
            package_db: db.to_string(),
            source: source_pkg,
            ..Default::default()
        });
    }
    packages
}

#[async_trait]
impl PackageScanner for DpkgPackageScanner {
    fn name(&self) -> &str {
        "dpkg"
    }

    fn version(&self) -> &str {
        "2"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Package>> {
        let mut packages = Vec::new();

        if layer.exists(STATUS_PATH) {
            let content = layer.read_to_string(STATUS_PATH).map_err(strata_core::Error::from)?;
            packages.extend(parse_status(&content, STATUS_PATH, true));
        }

        // distroless fragments: one file per package, no Status field
        let fragments: Vec<String> = layer
            .paths_under(STATUS_D_DIR)
            .map(String::from)
            .collect();
        for path in fragments {
            let Ok(content) = layer.read_to_string(&path) else {
                continue;
            };
            packages.extend(parse_status(&content, &path, false));
        }

        debug!(count = packages.len(), "scanned dpkg databases");
        Ok(packages)
    }
}

/// The dpkg ecosystem bundle
pub fn ecosystem() -> Ecosystem {
    Ecosystem {
        name: "dpkg",
        package_scanners: vec![Arc::new(DpkgPackageScanner)],
        distribution_scanners: vec![Arc::new(OsReleaseScanner)],
        repository_scanners: vec![],
        coalescer: Arc::new(OsCoalescer::new("dpkg")),
    }
}
