//! The matcher contract
//!
//! A matcher is an ecosystem policy in three steps: a cheap [`filter`]
//! rejecting records outside its ecosystem, the [`query`] constraints the
//! vulnerability store uses to fetch candidates, and the final
//! [`vulnerable`] decision applying version algebra. Matchers that can push
//! their version check into the store advertise it through the two version
//! methods.
//!
//! [`filter`]: Matcher::filter
//! [`query`]: Matcher::query
//! [`vulnerable`]: Matcher::vulnerable

use async_trait::async_trait;

use strata_core::{IndexRecord, Result, Vulnerability};
use strata_store::MatchConstraint;

#[async_trait]
pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap predicate: is this record in the matcher's ecosystem?
    fn filter(&self, record: &IndexRecord) -> bool;

    /// Fields the store must constrain candidate vulnerabilities by
    fn query(&self) -> &[MatchConstraint];

    /// Final decision for one (record, vulnerability) pair
    async fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool>;

    /// Normalized-version kind the store may range-filter on, if any
    fn version_filter(&self) -> Option<&str> {
        None
    }

    /// When true, a store-side range hit needs no `vulnerable` re-check
    fn version_authoritative(&self) -> bool {
        false
    }
}
