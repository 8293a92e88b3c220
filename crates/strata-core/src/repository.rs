//! Package repository model

use serde::{Deserialize, Serialize};

/// A repository a package was installed from
///
/// Matchers correlate packages to vulnerabilities by the repository's URI or
/// CPE, so those fields are the interesting ones; `key` carries
/// ecosystem-specific metadata (e.g. an apt archive component).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpe: Option<String>,
}

impl Repository {
    /// Identity ignoring the store-assigned `id`
    pub fn dedup_key(&self) -> (String, String, String) {
        (self.name.clone(), self.key.clone(), self.uri.clone())
    }
}
