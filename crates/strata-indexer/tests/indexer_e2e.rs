//! End-to-end indexing over synthetic layers
//!
//! Layers are built as real tars and seeded into the arena, so the fetcher
//! takes its cache-hit path and no network is involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use strata_cache::{LayerArena, DEFAULT_BUDGET};
use strata_core::{Algorithm, IndexState, LayerDescription, Manifest, MediaType, Package, Result};
use strata_indexer::coalesce::LanguageCoalescer;
use strata_indexer::{Ecosystem, Indexer, LayerFs, PackageScanner, ScannerRegistry};
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

/// Seed a tar into the arena and describe it as an uncompressed layer
fn seed_layer(arena: &LayerArena, tar_bytes: &[u8]) -> LayerDescription {
    let digest = Algorithm::Sha256.digest(tar_bytes);
    let staged = arena.staging_path(&digest);
    std::fs::write(&staged, tar_bytes).unwrap();
    arena.commit(&digest, &staged).unwrap();
    LayerDescription {
        digest,
        uri: "https://registry.invalid/unreachable".into(),
        media_type: MediaType::OciTar,
        headers: HashMap::new(),
    }
}

fn manifest_over(tag: &[u8], layers: Vec<LayerDescription>) -> Manifest {
    Manifest::new(Algorithm::Sha256.digest(tag), layers).unwrap()
}

struct Harness {
    _dir: TempDir,
    store: Arc<MemStore>,
    arena: Arc<LayerArena>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let arena = Arc::new(LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap());
        Self {
            _dir: dir,
            store: Arc::new(MemStore::new()),
            arena,
        }
    }

    fn indexer(&self) -> Indexer {
        Indexer::builder()
            .store(self.store.clone())
            .arena(self.arena.clone())
            .build()
            .unwrap()
    }

    fn indexer_with(&self, registry: ScannerRegistry) -> Indexer {
        Indexer::builder()
            .store(self.store.clone())
            .arena(self.arena.clone())
            .registry(Arc::new(registry))
            .build()
            .unwrap()
    }
}

const DPKG_STATUS: &str = concat!(
    "Package: bash\n",
    "Status: install ok installed\n",
    "Version: 5.0-6ubuntu1.1\n",
    "Architecture: amd64\n",
);

const OS_RELEASE: &str = concat!(
    "ID=ubuntu\n",
    "NAME=\"Ubuntu\"\n",
    "VERSION_ID=\"20.04\"\n",
    "VERSION_CODENAME=focal\n",
    "PRETTY_NAME=\"Ubuntu 20.04.6 LTS\"\n",
);

#[tokio::test]
async fn test_minimal_dpkg_indexing() {
    let harness = Harness::new();
    let layer = seed_layer(
        &harness.arena,
        &build_tar(&[
            ("var/lib/dpkg/status", DPKG_STATUS),
            ("etc/os-release", OS_RELEASE),
        ]),
    );
    let layer_digest = layer.digest.clone();
    let manifest = manifest_over(b"s1", vec![layer]);

    let report = harness.indexer().index(&manifest).await.unwrap();

    assert!(report.success, "err: {}", report.err);
    assert_eq!(report.state, IndexState::IndexFinished);
    assert_eq!(report.packages.len(), 1);

    let (id, bash) = report.packages.iter().next().unwrap();
    assert_eq!(bash.name, "bash");
    assert_eq!(bash.version, "5.0-6ubuntu1.1");
    assert_eq!(bash.arch.as_deref(), Some("amd64"));

    let dist = report.distributions.values().next().unwrap();
    assert_eq!(dist.did, "ubuntu");
    assert_eq!(dist.version_code_name, "focal");

    let envs = &report.environments[id];
    assert_eq!(envs[0].introduced_in, layer_digest);
    assert_eq!(envs[0].package_db, "var/lib/dpkg/status");
    assert_eq!(
        envs[0].distribution_id.as_deref(),
        Some(dist.id.as_str())
    );
}

fn npm_layer(arena: &LayerArena, version: &str) -> LayerDescription {
    let manifest_json = format!("{{\"name\": \"semver\", \"version\": \"{version}\"}}");
    seed_layer(
        arena,
        &build_tar(&[("app/node_modules/semver/package.json", &manifest_json)]),
    )
}

#[tokio::test]
async fn test_language_overwrite_semantics() {
    let harness = Harness::new();
    let l1 = npm_layer(&harness.arena, "7.3.8");
    let l2 = seed_layer(&harness.arena, &build_tar(&[("etc/motd", "hello\n")]));
    let l3 = npm_layer(&harness.arena, "7.5.2");
    // an identical tar has an identical digest, which is exactly the
    // carried-forward case: reuse the blob under a fourth ordinal
    let l4 = l3.clone();
    let introduced = l3.digest.clone();

    let manifest = manifest_over(b"s2", vec![l1, l2, l3, l4]);
    let report = harness.indexer().index(&manifest).await.unwrap();

    assert!(report.success, "err: {}", report.err);
    assert_eq!(report.packages.len(), 1);
    let (id, semver) = report.packages.iter().next().unwrap();
    assert_eq!(semver.name, "semver");
    assert_eq!(semver.version, "7.5.2");
    assert_eq!(report.environments[id][0].introduced_in, introduced);
}

#[tokio::test]
async fn test_distinct_npm_versions_in_distinct_layers() {
    // the S2 shape again, but with the lower occurrence differing in
    // content so all four layer digests are distinct
    let harness = Harness::new();
    let l1 = npm_layer(&harness.arena, "7.3.8");
    let l2 = seed_layer(&harness.arena, &build_tar(&[("etc/motd", "hello\n")]));
    let l3 = npm_layer(&harness.arena, "7.5.2");
    let l4 = seed_layer(
        &harness.arena,
        &build_tar(&[
            ("app/node_modules/semver/package.json", "{\"name\": \"semver\", \"version\": \"7.5.2\"}"),
            ("etc/motd", "rebuilt\n"),
        ]),
    );
    let introduced = l3.digest.clone();

    let manifest = manifest_over(b"s2b", vec![l1, l2, l3, l4]);
    let report = harness.indexer().index(&manifest).await.unwrap();

    assert!(report.success);
    assert_eq!(report.packages.len(), 1);
    let (id, semver) = report.packages.iter().next().unwrap();
    assert_eq!(semver.version, "7.5.2");
    assert_eq!(report.environments[id][0].introduced_in, introduced);
}

/// Wraps the npm scanner, counting invocations
struct CountingScanner {
    inner: strata_indexer::ecosystem::npm::NpmPackageScanner,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PackageScanner for CountingScanner {
    fn name(&self) -> &str {
        "npm"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn scan(&self, layer: &LayerFs) -> Result<Vec<Package>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(layer).await
    }
}

fn counting_registry(calls: Arc<AtomicUsize>) -> ScannerRegistry {
    ScannerRegistry::new(vec![Ecosystem {
        name: "npm",
        package_scanners: vec![Arc::new(CountingScanner {
            inner: strata_indexer::ecosystem::npm::NpmPackageScanner,
            calls,
        })],
        distribution_scanners: vec![],
        repository_scanners: vec![],
        coalescer: Arc::new(LanguageCoalescer::new("npm")),
    }])
}

#[tokio::test]
async fn test_reindex_is_a_no_op() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let indexer = harness.indexer_with(counting_registry(calls.clone()));

    let layer = npm_layer(&harness.arena, "7.5.2");
    let manifest = manifest_over(b"s5", vec![layer]);

    let first = indexer.index(&manifest).await.unwrap();
    assert!(first.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = indexer.index(&manifest).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1, "re-index ran a scanner");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_index_scans_at_most_once() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let indexer = Arc::new(harness.indexer_with(counting_registry(calls.clone())));

    let layer = npm_layer(&harness.arena, "7.5.2");
    let manifest = manifest_over(b"concurrent", vec![layer]);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let indexer = indexer.clone();
        let manifest = manifest.clone();
        tasks.push(tokio::spawn(async move {
            indexer.index(&manifest).await.unwrap()
        }));
    }
    let mut reports = Vec::new();
    for task in tasks {
        reports.push(task.await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(reports.iter().all(|r| r.success));
    assert!(reports.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_failing_scanner_fails_manifest_without_aborting_siblings() {
    struct FailingScanner;

    #[async_trait]
    impl PackageScanner for FailingScanner {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn version(&self) -> &str {
            "1"
        }

        async fn scan(&self, _layer: &LayerFs) -> Result<Vec<Package>> {
            Err(strata_core::Error::internal("synthetic scanner failure"))
        }
    }

    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ScannerRegistry::new(vec![Ecosystem {
        name: "npm",
        package_scanners: vec![
            Arc::new(CountingScanner {
                inner: strata_indexer::ecosystem::npm::NpmPackageScanner,
                calls: calls.clone(),
            }),
            Arc::new(FailingScanner),
        ],
        distribution_scanners: vec![],
        repository_scanners: vec![],
        coalescer: Arc::new(LanguageCoalescer::new("npm")),
    }]);
    let indexer = harness.indexer_with(registry);

    let layer = npm_layer(&harness.arena, "7.5.2");
    let manifest = manifest_over(b"failing", vec![layer]);

    let report = indexer.index(&manifest).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.state, IndexState::IndexError);
    assert!(report.err.contains("always-fails"), "err: {}", report.err);
    // the healthy sibling still ran
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the persisted record reflects the failure
    use strata_store::IndexerStore;
    let persisted = harness
        .store
        .index_report(&manifest.hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.state, IndexState::IndexError);
}

#[tokio::test]
async fn test_whiteout_end_to_end() {
    let harness = Harness::new();
    let lower = npm_layer(&harness.arena, "7.5.2");
    let upper = seed_layer(
        &harness.arena,
        &build_tar(&[("app/node_modules/.wh.semver", "")]),
    );

    let manifest = manifest_over(b"whiteout", vec![lower, upper]);
    let report = harness.indexer().index(&manifest).await.unwrap();

    assert!(report.success);
    assert!(report.packages.is_empty());
}
