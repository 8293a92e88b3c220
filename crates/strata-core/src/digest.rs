//! Content-addressable digests
//!
//! Layers and manifests are referred to by digest everywhere in strata. The
//! canonical textual form is `"<algorithm>:<hex-checksum>"`, and parsing is
//! strict: a known algorithm with a wrong-length checksum is rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::Error;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Checksum length in bytes
    pub fn checksum_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Hash `data` in one shot
    pub fn digest(&self, data: &[u8]) -> Digest {
        let mut h = self.hasher();
        h.update(data);
        h.finish()
    }

    /// Instantiate an incremental hasher for this algorithm
    pub fn hasher(&self) -> Hasher {
        match self {
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::invalid(format!("unknown digest algorithm: {other}"))),
        }
    }
}

/// A content address: algorithm plus checksum
///
/// Two digests are equal iff both components are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    checksum: Vec<u8>,
}

impl Digest {
    /// Construct from raw checksum bytes, validating the length
    pub fn new(algorithm: Algorithm, checksum: Vec<u8>) -> Result<Self, Error> {
        if checksum.len() != algorithm.checksum_len() {
            return Err(Error::invalid(format!(
                "bad checksum length for {}: got {} bytes, want {}",
                algorithm,
                checksum.len(),
                algorithm.checksum_len()
            )));
        }
        Ok(Self {
            algorithm,
            checksum,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.checksum))
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hexsum) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid(format!("digest missing algorithm prefix: {s:?}")))?;
        let algorithm: Algorithm = algo.parse()?;
        let checksum = hex::decode(hexsum)
            .map_err(|e| Error::invalid(format!("bad digest checksum: {e}")))?;
        Self::new(algorithm, checksum)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher producing a [`Digest`]
pub enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Digest {
        match self {
            Self::Sha256(h) => Digest {
                algorithm: Algorithm::Sha256,
                checksum: h.finalize().to_vec(),
            },
            Self::Sha512(h) => Digest {
                algorithm: Algorithm::Sha512,
                checksum: h.finalize().to_vec(),
            },
        }
    }
}
