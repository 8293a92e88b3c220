//! Operating-system distribution model, os-release derived

use serde::{Deserialize, Serialize};

/// A distribution as reported by a layer's `os-release` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(default)]
    pub id: String,
    /// The os-release `ID` field, e.g. `"ubuntu"`
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// The os-release `VERSION_CODENAME` field, e.g. `"focal"`
    #[serde(default)]
    pub version_code_name: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub cpe: String,
    #[serde(default)]
    pub pretty_name: String,
}

impl Distribution {
    /// Identity ignoring the store-assigned `id`
    pub fn dedup_key(&self) -> (String, String, String, String) {
        (
            self.did.clone(),
            self.version_id.clone(),
            self.version_code_name.clone(),
            self.arch.clone(),
        )
    }

    /// True when no os-release field carried a value
    pub fn is_empty(&self) -> bool {
        self.did.is_empty()
            && self.name.is_empty()
            && self.version.is_empty()
            && self.version_id.is_empty()
            && self.pretty_name.is_empty()
    }
}
