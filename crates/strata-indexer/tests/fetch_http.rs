//! Fetcher behavior against a real HTTP endpoint
//!
//! A minimal single-purpose HTTP server backs each test, so the download,
//! decompression, and checksum-verification paths all run for real.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use strata_cache::{LayerArena, LocalLocks, LockSource, DEFAULT_BUDGET};
use strata_core::{Algorithm, ErrorKind, IndexState, LayerDescription, Manifest, MediaType};
use strata_indexer::{Indexer, LayerFetcher};
use strata_store::MemStore;

fn build_tar(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Serve `body` for any number of GET requests, returning the bound URI
async fn serve(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                // drain the request head
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/blob")
}

#[tokio::test]
async fn test_fetch_gzip_layer_end_to_end() {
    let dir = TempDir::new().unwrap();
    let arena = Arc::new(LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap());
    let locks: Arc<dyn LockSource> = Arc::new(LocalLocks::new());

    let tar_bytes = build_tar(&[("etc/os-release", "ID=alpine\nVERSION_ID=3.19.1\n")]);
    let wire = gzip(&tar_bytes);
    // the layer digest addresses the blob as served
    let digest = Algorithm::Sha256.digest(&wire);
    let uri = serve(wire).await;

    let fetcher = LayerFetcher::new(reqwest::Client::new(), arena.clone(), locks, 0);
    let layer = LayerDescription {
        digest: digest.clone(),
        uri,
        media_type: MediaType::OciTarGzip,
        headers: HashMap::new(),
    };

    let path = fetcher.fetch(&layer).await.unwrap();
    // committed blob is the decompressed tar
    assert_eq!(std::fs::read(&path).unwrap(), tar_bytes);
    assert!(arena.contains(&digest));

    // a second fetch is a pure cache hit
    let again = fetcher.fetch(&layer).await.unwrap();
    assert_eq!(again, path);
}

#[tokio::test]
async fn test_fetch_checksum_mismatch_is_permanent() {
    let dir = TempDir::new().unwrap();
    let arena = Arc::new(LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap());
    let locks: Arc<dyn LockSource> = Arc::new(LocalLocks::new());

    let tar_bytes = build_tar(&[("etc/motd", "tampered\n")]);
    // advertise a digest the served bytes cannot satisfy
    let digest = Algorithm::Sha256.digest(b"what the registry promised");
    let uri = serve(tar_bytes).await;

    let fetcher = LayerFetcher::new(reqwest::Client::new(), arena.clone(), locks, 3);
    let layer = LayerDescription {
        digest: digest.clone(),
        uri,
        media_type: MediaType::OciTar,
        headers: HashMap::new(),
    };

    let err = fetcher.fetch(&layer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(err.message().contains("checksum"), "got: {err}");
    assert!(!arena.contains(&digest));
}

#[tokio::test]
async fn test_index_over_http_layer() {
    let dir = TempDir::new().unwrap();
    let arena = Arc::new(LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap());
    let store = Arc::new(MemStore::new());

    let tar_bytes = build_tar(&[
        (
            "lib/apk/db/installed",
            "P:musl\nV:1.2.4-r2\nA:x86_64\n",
        ),
        ("etc/os-release", "ID=alpine\nVERSION_ID=3.19.1\n"),
        (
            "etc/apk/repositories",
            "https://dl-cdn.alpinelinux.org/alpine/v3.19/main\n",
        ),
    ]);
    let wire = gzip(&tar_bytes);
    let digest = Algorithm::Sha256.digest(&wire);
    let uri = serve(wire).await;

    let manifest = Manifest::new(
        Algorithm::Sha256.digest(b"http-manifest"),
        vec![LayerDescription {
            digest,
            uri,
            media_type: MediaType::OciTarGzip,
            headers: HashMap::new(),
        }],
    )
    .unwrap();

    let indexer = Indexer::builder().store(store).arena(arena).build().unwrap();
    let report = indexer.index(&manifest).await.unwrap();

    assert!(report.success, "err: {}", report.err);
    let (id, musl) = report.packages.iter().next().unwrap();
    assert_eq!(musl.name, "musl");
    assert_eq!(report.distributions.values().next().unwrap().did, "alpine");
    // the repository from etc/apk/repositories is attached to the package
    let env = &report.environments[id][0];
    assert_eq!(env.repository_ids.len(), 1);
    assert_eq!(
        report.repositories[&env.repository_ids[0]].uri,
        "https://dl-cdn.alpinelinux.org/alpine/v3.19/main"
    );
}

#[tokio::test]
async fn test_unreachable_layer_yields_index_error() {
    let dir = TempDir::new().unwrap();
    let arena = Arc::new(LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap());
    let store = Arc::new(MemStore::new());

    let manifest = Manifest::new(
        Algorithm::Sha256.digest(b"unreachable"),
        vec![LayerDescription {
            digest: Algorithm::Sha256.digest(b"no such blob"),
            // a port nothing listens on; connection refused is transient,
            // so retries run out first
            uri: "http://127.0.0.1:9/blob".into(),
            media_type: MediaType::OciTar,
            headers: HashMap::new(),
        }],
    )
    .unwrap();

    let indexer = Indexer::builder()
        .store(store)
        .arena(arena)
        .opts(strata_indexer::IndexerOpts {
            fetch_retries: 1,
            ..Default::default()
        })
        .build()
        .unwrap();

    let report = indexer.index(&manifest).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.state, IndexState::IndexError);
    assert!(!report.err.is_empty());
}
