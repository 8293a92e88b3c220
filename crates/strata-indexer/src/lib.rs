//! The strata indexer
//!
//! Turns a [`Manifest`] into an [`IndexReport`]: fetch the layers through
//! the cache, run every configured scanner over every layer (memoized per
//! (layer, scanner) pair, bounded concurrency), coalesce per-ecosystem
//! artifacts into a whole-image inventory, and persist the result. The
//! entry point is [`Indexer::index`]; everything it holds (store, cache,
//! locks, HTTP client, scanner registry) is shared, built once, and never
//! mutated afterwards.

mod controller;
pub mod coalesce;
pub mod ecosystem;
mod fetcher;
pub mod registry;
pub mod scanner;

pub use fetcher::LayerFetcher;
pub use registry::{Ecosystem, ScannerRegistry};
pub use scanner::{
    scanner_set_digest, Coalescer, DistributionScanner, LayerArtifacts, LayerFs, PackageScanner,
    RepositoryScanner,
};

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use strata_cache::{LayerArena, LocalLocks, LockSource};
use strata_core::{Digest, Error, IndexReport, Manifest, Result, ScannerInfo};
use strata_store::IndexerStore;

use controller::Controller;

/// Tunables for one indexer instance
#[derive(Debug, Clone)]
pub struct IndexerOpts {
    /// Concurrent (layer, scanner) scans per manifest
    pub scan_concurrency: usize,
    /// Concurrent layer downloads
    pub fetch_concurrency: usize,
    /// Retries for transient fetch failures
    pub fetch_retries: u32,
}

impl Default for IndexerOpts {
    fn default() -> Self {
        Self {
            scan_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            fetch_concurrency: 4,
            fetch_retries: 3,
        }
    }
}

/// The indexing service
pub struct Indexer {
    pub(crate) store: Arc<dyn IndexerStore>,
    pub(crate) registry: Arc<ScannerRegistry>,
    pub(crate) fetcher: LayerFetcher,
    pub(crate) locks: Arc<dyn LockSource>,
    pub(crate) opts: IndexerOpts,
}

impl Indexer {
    pub fn builder() -> IndexerBuilder {
        IndexerBuilder::default()
    }

    /// Index one manifest.
    ///
    /// Idempotent: resubmitting a manifest already indexed by the configured
    /// scanner set returns the persisted report without invoking a single
    /// scanner. Fetch and scan failures come back as a report in the error
    /// state with `success == false`; configuration problems surface as
    /// errors before any work begins.
    pub async fn index(&self, manifest: &Manifest) -> Result<IndexReport> {
        let scanners = self.registry.scanner_infos();
        if scanners.is_empty() {
            return Err(Error::precondition("no scanners configured"));
        }
        self.store.register_scanners(&scanners).await?;

        // serialize on the manifest digest: concurrent submissions wait, then
        // short-circuit off the finished report, so every (layer, scanner)
        // pair is scanned at most once
        let _guard = self.locks.lock(&manifest.hash.to_string()).await?;
        Controller::new(self, manifest.clone()).run().await
    }
}

/// Builder for [`Indexer`]
#[derive(Default)]
pub struct IndexerBuilder {
    store: Option<Arc<dyn IndexerStore>>,
    arena: Option<Arc<LayerArena>>,
    locks: Option<Arc<dyn LockSource>>,
    client: Option<reqwest::Client>,
    registry: Option<Arc<ScannerRegistry>>,
    opts: IndexerOpts,
}

impl IndexerBuilder {
    pub fn store(mut self, store: Arc<dyn IndexerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn arena(mut self, arena: Arc<LayerArena>) -> Self {
        self.arena = Some(arena);
        self
    }

    /// Lock backend; defaults to process-local locks
    pub fn locks(mut self, locks: Arc<dyn LockSource>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Scanner registry; defaults to the built-in ecosystems
    pub fn registry(mut self, registry: Arc<ScannerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn opts(mut self, opts: IndexerOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn build(self) -> Result<Indexer> {
        let store = self
            .store
            .ok_or_else(|| Error::precondition("indexer requires a store"))?;
        let arena = self
            .arena
            .ok_or_else(|| Error::precondition("indexer requires a layer arena"))?;
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(LocalLocks::new()) as Arc<dyn LockSource>);
        let client = match self.client {
            Some(c) => c,
            None => reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .map_err(|e| Error::internal(format!("http client: {e}")))?,
        };
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ScannerRegistry::defaults()));
        let fetcher = LayerFetcher::new(client, arena, locks.clone(), self.opts.fetch_retries);
        Ok(Indexer {
            store,
            registry,
            fetcher,
            locks,
            opts: self.opts,
        })
    }
}

/// One (layer, scanner) unit of work
pub(crate) enum ScanJob {
    Package(Arc<dyn PackageScanner>),
    Distribution(Arc<dyn DistributionScanner>),
    Repository(Arc<dyn RepositoryScanner>),
}

impl ScanJob {
    pub(crate) fn info(&self) -> ScannerInfo {
        match self {
            Self::Package(s) => s.info(),
            Self::Distribution(s) => s.info(),
            Self::Repository(s) => s.info(),
        }
    }

    /// Run the scan and commit artifacts plus the scanned marker
    pub(crate) async fn execute(
        self,
        store: Arc<dyn IndexerStore>,
        layer: Digest,
        fs: Arc<LayerFs>,
    ) -> Result<()> {
        let info = self.info();
        let attribute = |e: Error| {
            Error::new(
                e.kind(),
                format!("scanner {info} on layer {layer}: {}", e.message()),
            )
        };

        match &self {
            Self::Package(scanner) => {
                let artifacts = scanner.scan(&fs).await.map_err(attribute)?;
                store.index_packages(&artifacts, &layer, &info).await?;
            }
            Self::Distribution(scanner) => {
                let artifacts = scanner.scan(&fs).await.map_err(attribute)?;
                store.index_distributions(&artifacts, &layer, &info).await?;
            }
            Self::Repository(scanner) => {
                let artifacts = scanner.scan(&fs).await.map_err(attribute)?;
                store.index_repositories(&artifacts, &layer, &info).await?;
            }
        }
        store.set_layer_scanned(&layer, &info).await?;
        counter!("strata_indexer_scans_total").increment(1);
        Ok(())
    }
}
