//! Image manifests

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::Error;
use crate::layer::LayerDescription;

/// A container image: a content-addressed identifier plus its layers in
/// bottom-to-top stacking order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub hash: Digest,
    pub layers: Vec<LayerDescription>,
}

impl Manifest {
    pub fn new(hash: Digest, layers: Vec<LayerDescription>) -> Result<Self, Error> {
        if layers.is_empty() {
            return Err(Error::invalid(format!("manifest {hash} has no layers")));
        }
        Ok(Self { hash, layers })
    }

    /// Layer digests in stacking order, duplicates included
    pub fn layer_digests(&self) -> impl Iterator<Item = &Digest> {
        self.layers.iter().map(|l| &l.digest)
    }

    /// True when `digest` names one of this manifest's layers
    pub fn has_layer(&self, digest: &Digest) -> bool {
        self.layers.iter().any(|l| &l.digest == digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use crate::layer::MediaType;

    #[test]
    fn test_empty_manifest_rejected() {
        let hash = Algorithm::Sha256.digest(b"m");
        assert!(Manifest::new(hash, vec![]).is_err());
    }

    #[test]
    fn test_has_layer() {
        let hash = Algorithm::Sha256.digest(b"m");
        let layer = Algorithm::Sha256.digest(b"l0");
        let m = Manifest::new(
            hash,
            vec![LayerDescription {
                digest: layer.clone(),
                uri: "https://registry.example/blobs/0".into(),
                media_type: MediaType::OciTarGzip,
                headers: Default::default(),
            }],
        )
        .unwrap();
        assert!(m.has_layer(&layer));
        assert!(!m.has_layer(&Algorithm::Sha256.digest(b"other")));
    }
}
