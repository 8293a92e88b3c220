//! Vulnerability store contracts
//!
//! The matcher reads through [`VulnerabilityStore`]; the external updater
//! subsystem writes through [`VulnerabilityUpdateStore`]. Update operations
//! are the tombstone unit: deleting an operation garbage-collects the
//! vulnerabilities it introduced.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::{IndexRecord, Result, Vulnerability};

/// Fields a matcher may require the store to constrain candidates by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchConstraint {
    PackageName,
    PackageModule,
    DistributionDid,
    DistributionName,
    DistributionVersionCodeName,
    DistributionVersionId,
    RepositoryName,
    RepositoryUri,
}

/// Options for a bulk candidate query
#[derive(Debug, Clone, Default)]
pub struct GetOpts {
    /// Constraints the store must apply between record and vulnerability
    pub constraints: Vec<MatchConstraint>,
    /// When set, the store additionally filters candidates whose range is in
    /// this version kind against the record's normalized version
    pub version_filter: Option<String>,
}

/// One completed run of an updater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    /// Opaque reference used for tombstoning
    pub r#ref: String,
    pub updater: String,
    /// Source fingerprint the updater saw (e.g. an HTTP etag)
    pub fingerprint: String,
    pub date: DateTime<Utc>,
}

/// Read access to vulnerabilities, as consumed by the matcher
#[async_trait]
pub trait VulnerabilityStore: Send + Sync {
    /// Candidate vulnerabilities for each record, keyed by the record's
    /// package ID. Applies `opts.constraints` and, when requested, the
    /// version-range pushdown.
    async fn get(
        &self,
        records: &[IndexRecord],
        opts: &GetOpts,
    ) -> Result<HashMap<String, Vec<Vulnerability>>>;

    /// Update operations per updater, newest first
    async fn update_operations(&self) -> Result<HashMap<String, Vec<UpdateOperation>>>;
}

/// Write access for the external updater subsystem
#[async_trait]
pub trait VulnerabilityUpdateStore: Send + Sync {
    /// Record one updater run and its vulnerabilities
    async fn update_vulnerabilities(
        &self,
        updater: &str,
        fingerprint: &str,
        vulnerabilities: &[Vulnerability],
    ) -> Result<UpdateOperation>;

    /// Tombstone GC: drop operations and the vulnerabilities they introduced
    async fn delete_update_operations(&self, refs: &[String]) -> Result<u64>;
}
