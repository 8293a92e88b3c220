//! Distribution detection from os-release
//!
//! Reads `etc/os-release` (or the `usr/lib` fallback) out of a layer and
//! derives a [`Distribution`]. Shared by every OS ecosystem.

use async_trait::async_trait;
use tracing::debug;

use strata_core::{Distribution, Result};

use crate::scanner::{DistributionScanner, LayerFs};

const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// The os-release distribution scanner
#[derive(Debug, Default)]
pub struct OsReleaseScanner;

/// Parse os-release `KEY=VALUE` content, unquoting values
pub fn parse(content: &str) -> Distribution {
    let mut dist = Distribution::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"').trim_matches('\'');
        match key {
            "ID" => dist.did = value.to_lowercase(),
            "NAME" => dist.name = value.to_string(),
            "VERSION" => dist.version = value.to_string(),
            "VERSION_ID" => dist.version_id = value.to_string(),
            "VERSION_CODENAME" => dist.version_code_name = value.to_string(),
            "PRETTY_NAME" => dist.pretty_name = value.to_string(),
            "CPE_NAME" => dist.cpe = value.to_string(),
            _ => {}
        }
    }
    dist
}

#[async_trait]
impl DistributionScanner for OsReleaseScanner {
    fn name(&self) -> &str {
        "os-release"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Distribution>> {
        for path in OS_RELEASE_PATHS {
            let Ok(content) = layer.read_to_string(path) else {
                continue;
            };
            let dist = parse(&content);
            if dist.is_empty() {
                continue;
            }
            debug!(did = %dist.did, version_id = %dist.version_id, "detected distribution");
            return Ok(vec![dist]);
        }
        Ok(vec![])
    }
}
