//! The strata matcher
//!
//! Takes an [`IndexReport`](strata_core::IndexReport) and produces a
//! [`VulnerabilityReport`](strata_core::VulnerabilityReport) by fanning the
//! report's records out over ecosystem matchers, each of which constrains
//! the vulnerability store its own way and applies its ecosystem's version
//! algebra. The reverse direction, from a fresh advisory to the manifests
//! it affects, lives in [`affected_manifests`].

pub mod apk;
pub mod dpkg;
pub mod npm;

mod affected;
mod matcher;
mod runtime;

pub use affected::affected_manifests;
pub use matcher::Matcher;
pub use runtime::{match_report, severity_sorted_ids};

use std::sync::Arc;

/// The built-in matchers, one per built-in ecosystem
pub fn default_matchers() -> Vec<Arc<dyn Matcher>> {
    vec![
        Arc::new(dpkg::DpkgMatcher),
        Arc::new(apk::ApkMatcher),
        Arc::new(npm::NpmMatcher),
    ]
}

/// Select matchers by name from the built-in set
pub fn matchers_by_name(names: &[&str]) -> Vec<Arc<dyn Matcher>> {
    default_matchers()
        .into_iter()
        .filter(|m| names.contains(&m.name()))
        .collect()
}
