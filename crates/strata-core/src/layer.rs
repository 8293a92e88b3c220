//! Layer descriptions and OCI media types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::Digest;
use crate::error::Error;

/// Compression applied to a layer's tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

/// The tar media types a layer may be served as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    OciTar,
    OciTarGzip,
    OciTarZstd,
    DockerTar,
    DockerTarGzip,
}

impl MediaType {
    pub fn compression(&self) -> Compression {
        match self {
            Self::OciTar | Self::DockerTar => Compression::None,
            Self::OciTarGzip | Self::DockerTarGzip => Compression::Gzip,
            Self::OciTarZstd => Compression::Zstd,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OciTar => "application/vnd.oci.image.layer.v1.tar",
            Self::OciTarGzip => "application/vnd.oci.image.layer.v1.tar+gzip",
            Self::OciTarZstd => "application/vnd.oci.image.layer.v1.tar+zstd",
            Self::DockerTar => "application/vnd.docker.image.rootfs.diff.tar",
            Self::DockerTarGzip => "application/vnd.docker.image.rootfs.diff.tar.gzip",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "application/vnd.oci.image.layer.v1.tar" => Ok(Self::OciTar),
            "application/vnd.oci.image.layer.v1.tar+gzip" => Ok(Self::OciTarGzip),
            "application/vnd.oci.image.layer.v1.tar+zstd" => Ok(Self::OciTarZstd),
            "application/vnd.docker.image.rootfs.diff.tar" => Ok(Self::DockerTar),
            "application/vnd.docker.image.rootfs.diff.tar.gzip" => Ok(Self::DockerTarGzip),
            other => Err(Error::invalid(format!("unsupported layer media type: {other:?}"))),
        }
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where and how to fetch one layer of a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub digest: Digest,
    pub uri: String,
    pub media_type: MediaType,
    /// Extra request headers (e.g. registry auth), multi-valued
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_round_trip() {
        for mt in [
            MediaType::OciTar,
            MediaType::OciTarGzip,
            MediaType::OciTarZstd,
            MediaType::DockerTar,
            MediaType::DockerTarGzip,
        ] {
            assert_eq!(mt.as_str().parse::<MediaType>().unwrap(), mt);
        }
    }

    #[test]
    fn test_media_type_rejects_unknown() {
        assert!("application/json".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_compression_mapping() {
        assert_eq!(MediaType::OciTar.compression(), Compression::None);
        assert_eq!(MediaType::OciTarGzip.compression(), Compression::Gzip);
        assert_eq!(MediaType::OciTarZstd.compression(), Compression::Zstd);
        assert_eq!(MediaType::DockerTarGzip.compression(), Compression::Gzip);
    }
}
