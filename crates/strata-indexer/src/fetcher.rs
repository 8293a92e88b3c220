//! Layer fetching
//!
//! Fetches are keyed by digest and guarded by the lock abstraction, so a
//! blob is downloaded at most once no matter how many manifests want it
//! concurrently. The wire bytes are hashed while streaming and verified
//! against the layer digest before anything is committed; a mismatch on
//! immutable content is permanent, transport trouble is transient and
//! retried with backoff.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use futures::StreamExt;
use metrics::counter;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use strata_cache::{LayerArena, LockSource};
use strata_core::{Compression, Error, LayerDescription, Result};

/// Downloads, verifies, and caches layer blobs
pub struct LayerFetcher {
    client: reqwest::Client,
    arena: Arc<LayerArena>,
    locks: Arc<dyn LockSource>,
    retries: u32,
}

impl LayerFetcher {
    pub fn new(
        client: reqwest::Client,
        arena: Arc<LayerArena>,
        locks: Arc<dyn LockSource>,
        retries: u32,
    ) -> Self {
        Self {
            client,
            arena,
            locks,
            retries,
        }
    }

    /// Return a path to the decompressed blob, fetching it if needed.
    ///
    /// Holds the digest lock across the miss window; a waiter that acquires
    /// the lock after a concurrent fetch finds the blob present.
    pub async fn fetch(&self, layer: &LayerDescription) -> Result<PathBuf> {
        let key = layer.digest.to_string();
        let guard = self.locks.lock(&key).await?;

        if let Some(path) = self.arena.realize(&layer.digest) {
            counter!("strata_fetcher_cache_hits_total").increment(1);
            debug!(digest = %layer.digest, "layer served from cache");
            return Ok(path);
        }
        counter!("strata_fetcher_cache_misses_total").increment(1);

        let lost = guard.cancellation();
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = lost.cancelled() => {
                    Err(Error::transient(format!("lost layer lock fetching {}", layer.digest)))
                }
                res = self.download(layer) => res,
            };
            match result {
                Ok(path) => return Ok(path),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * (1 << attempt.min(6)));
                    warn!(
                        digest = %layer.digest,
                        attempt,
                        error = %e,
                        "transient layer fetch failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    counter!("strata_fetcher_failures_total").increment(1);
                    return Err(e);
                }
            }
        }
    }

    async fn download(&self, layer: &LayerDescription) -> Result<PathBuf> {
        info!(digest = %layer.digest, uri = %layer.uri, "fetching layer");

        let mut request = self.client.get(&layer.uri);
        for (name, values) in &layer.headers {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::transient(format!("layer request failed: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Error::transient(format!(
                "layer fetch returned {status} for {}",
                layer.uri
            )));
        }
        if !status.is_success() {
            return Err(Error::permanent(format!(
                "layer fetch returned {status} for {}",
                layer.uri
            )));
        }

        // stream to disk, hashing the wire bytes as served
        let wire_path = self
            .arena
            .staging_path(&layer.digest)
            .with_extension("fetch");
        let mut wire_file = tokio::fs::File::create(&wire_path).await?;
        let mut hasher = layer.digest.algorithm().hasher();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::transient(format!("layer body interrupted: {e}")))?;
            hasher.update(&chunk);
            wire_file.write_all(&chunk).await?;
        }
        wire_file.flush().await?;
        drop(wire_file);

        let got = hasher.finish();
        if got != layer.digest {
            let _ = tokio::fs::remove_file(&wire_path).await;
            return Err(Error::permanent(format!(
                "layer checksum mismatch: want {}, got {got}",
                layer.digest
            )));
        }

        // decompress into the staging slot and commit
        let staged = self.arena.staging_path(&layer.digest);
        let wire = BufReader::new(tokio::fs::File::open(&wire_path).await?);
        let mut out = tokio::fs::File::create(&staged).await?;
        match layer.media_type.compression() {
            Compression::None => {
                let mut wire = wire;
                tokio::io::copy(&mut wire, &mut out).await?;
            }
            Compression::Gzip => {
                let mut decoder = GzipDecoder::new(wire);
                tokio::io::copy(&mut decoder, &mut out).await?;
            }
            Compression::Zstd => {
                let mut decoder = ZstdDecoder::new(wire);
                tokio::io::copy(&mut decoder, &mut out).await?;
            }
        }
        out.flush().await?;
        drop(out);
        let _ = tokio::fs::remove_file(&wire_path).await;

        self.arena.commit(&layer.digest, &staged)
    }
}
