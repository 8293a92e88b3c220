//! Shared data model for strata
//!
//! This crate holds everything the indexer, matcher, and stores agree on:
//! content-addressable digests, the kind-tagged version algebra, the
//! package/distribution/repository inventory types, manifests and layer
//! descriptions, index and vulnerability reports, and the error taxonomy.
//! It has no I/O of its own.

pub mod digest;
pub mod distribution;
pub mod error;
pub mod layer;
pub mod manifest;
pub mod package;
pub mod report;
pub mod repository;
pub mod scanner;
pub mod severity;
pub mod version;
pub mod vulnerability;

pub use digest::{Algorithm, Digest, Hasher};
pub use distribution::Distribution;
pub use error::{Error, ErrorKind, Result};
pub use layer::{Compression, LayerDescription, MediaType};
pub use manifest::Manifest;
pub use package::{Package, PackageKind};
pub use report::{Environment, IndexRecord, IndexReport, IndexState, VulnerabilityReport};
pub use repository::Repository;
pub use scanner::{ScannerInfo, ScannerKind};
pub use severity::Severity;
pub use version::{Version, VersionRange, VERSION_SLOTS};
pub use vulnerability::{ArchOperation, Vulnerability};
