//! The per-manifest indexing state machine
//!
//! One controller drives one manifest through
//! `CheckManifest → FetchLayers → ScanLayers → Coalesce → IndexManifest`
//! and into a terminal state, persisting the report on every transition.
//! Scans fan out over (layer, scanner) pairs under a bounded concurrency
//! limit; a failing or panicking scanner is attributed to its pair and does
//! not cut short sibling scans, but it does fail the manifest.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tracing::{debug, error, info};

use strata_core::{Digest, Error, IndexReport, IndexState, Manifest, Result, ScannerInfo};
use strata_tarfs::{whiteout, TarFs};

use crate::registry::ScannerRegistry;
use crate::scanner::{scanner_set_digest, LayerArtifacts, LayerFs};
use crate::{Indexer, ScanJob};

enum Transition {
    Next(IndexState),
    Done(IndexReport),
}

pub(crate) struct Controller<'a> {
    indexer: &'a Indexer,
    manifest: Manifest,
    scanners: Vec<ScannerInfo>,
    report: IndexReport,
    layer_fs: HashMap<Digest, Arc<LayerFs>>,
}

impl<'a> Controller<'a> {
    pub(crate) fn new(indexer: &'a Indexer, manifest: Manifest) -> Self {
        let report = IndexReport::new(manifest.hash.clone());
        let scanners = indexer.registry.scanner_infos();
        Self {
            indexer,
            manifest,
            scanners,
            report,
            layer_fs: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<IndexReport> {
        let mut state = IndexState::CheckManifest;
        loop {
            self.report.state = state;
            // persist every transition, but never clobber a finished report
            // before the memoization check has had its look
            if state != IndexState::CheckManifest {
                self.indexer.store.set_index_report(&self.report).await?;
            }

            let step = match state {
                IndexState::CheckManifest => self.check_manifest().await,
                IndexState::FetchLayers => self.fetch_layers().await,
                IndexState::ScanLayers => self.scan_layers().await,
                IndexState::Coalesce => self.coalesce().await,
                IndexState::IndexManifest => self.index_manifest().await,
                IndexState::IndexFinished | IndexState::IndexError => {
                    return Err(Error::internal(format!(
                        "stepped a terminal state: {state}"
                    )))
                }
            };

            match step {
                Ok(Transition::Next(next)) => {
                    debug!(manifest = %self.manifest.hash, from = %state, to = %next, "transition");
                    state = next;
                }
                Ok(Transition::Done(report)) => return Ok(report),
                Err(e) => {
                    error!(manifest = %self.manifest.hash, state = %state, error = %e, "indexing failed");
                    counter!("strata_indexer_failures_total").increment(1);
                    self.report.state = IndexState::IndexError;
                    self.report.success = false;
                    self.report.err = e.to_string();
                    // best effort: the terminal state must land even if the
                    // store write that got us here is what failed
                    let _ = self.indexer.store.set_index_report(&self.report).await;
                    return Ok(self.report);
                }
            }
        }
    }

    async fn check_manifest(&mut self) -> Result<Transition> {
        let store = &self.indexer.store;
        store.persist_manifest(&self.manifest).await?;

        let set = scanner_set_digest(&self.scanners);
        if store
            .manifest_scanned(&self.manifest.hash, &self.scanners)
            .await?
        {
            if let Some(report) = store.index_report(&self.manifest.hash).await? {
                info!(
                    manifest = %self.manifest.hash,
                    scanner_set = %set,
                    "manifest already indexed by this scanner set"
                );
                counter!("strata_indexer_memoized_total").increment(1);
                return Ok(Transition::Done(report));
            }
        }
        debug!(manifest = %self.manifest.hash, scanner_set = %set, "index work required");
        Ok(Transition::Next(IndexState::FetchLayers))
    }

    async fn fetch_layers(&mut self) -> Result<Transition> {
        // fetch each distinct digest once
        let mut seen = std::collections::HashSet::new();
        let distinct: Vec<_> = self
            .manifest
            .layers
            .iter()
            .filter(|l| seen.insert(l.digest.clone()))
            .cloned()
            .collect();

        let fetcher = &self.indexer.fetcher;
        let fetched: Vec<Result<(Digest, std::path::PathBuf)>> = stream::iter(distinct)
            .map(|layer| async move {
                let path = fetcher.fetch(&layer).await?;
                Ok((layer.digest, path))
            })
            .buffer_unordered(self.indexer.opts.fetch_concurrency)
            .collect()
            .await;

        for result in fetched {
            let (digest, path) = result?;
            let file = std::fs::File::open(&path)
                .map_err(|e| Error::internal(format!("open layer blob {digest}: {e}")))?;
            let fs = TarFs::new(file).map_err(Error::from)?;
            self.layer_fs.insert(digest, Arc::new(fs));
        }
        Ok(Transition::Next(IndexState::ScanLayers))
    }

    async fn scan_layers(&mut self) -> Result<Transition> {
        let registry: &ScannerRegistry = &self.indexer.registry;
        let store = self.indexer.store.clone();

        // every (layer, scanner) pair the store has not seen yet
        let mut jobs: Vec<(Digest, Arc<LayerFs>, ScanJob)> = Vec::new();
        for (digest, fs) in &self.layer_fs {
            for scanner in registry.package_scanners() {
                jobs.push((digest.clone(), fs.clone(), ScanJob::Package(scanner)));
            }
            for scanner in registry.distribution_scanners() {
                jobs.push((digest.clone(), fs.clone(), ScanJob::Distribution(scanner)));
            }
            for scanner in registry.repository_scanners() {
                jobs.push((digest.clone(), fs.clone(), ScanJob::Repository(scanner)));
            }
        }

        let mut pending = Vec::new();
        for (digest, fs, job) in jobs {
            if store.layer_scanned(&digest, &job.info()).await? {
                counter!("strata_indexer_scans_memoized_total").increment(1);
                continue;
            }
            pending.push((digest, fs, job));
        }

        let results: Vec<Result<()>> = stream::iter(pending)
            .map(|(digest, fs, job)| {
                let store = store.clone();
                async move {
                    let info = job.info();
                    let handle =
                        tokio::spawn(async move { job.execute(store, digest, fs).await });
                    match handle.await {
                        Ok(result) => result,
                        // a panic is captured and attributed to its pair
                        Err(join_err) => Err(Error::internal(format!(
                            "scanner {info} panicked: {join_err}"
                        ))),
                    }
                }
            })
            .buffer_unordered(self.indexer.opts.scan_concurrency)
            .collect()
            .await;

        // collect everything before failing so sibling scans complete and
        // their markers land
        for result in results {
            result?;
        }
        Ok(Transition::Next(IndexState::Coalesce))
    }

    async fn coalesce(&mut self) -> Result<Transition> {
        let store = &self.indexer.store;

        // whiteout names come from the fetched layers, not the store
        let mut whiteouts: HashMap<Digest, Vec<String>> = HashMap::new();
        for (digest, fs) in &self.layer_fs {
            let names: Vec<String> = fs
                .paths()
                .filter(|p| whiteout::is_whiteout(p))
                .map(String::from)
                .collect();
            whiteouts.insert(digest.clone(), names);
        }

        for eco in self.indexer.registry.ecosystems() {
            let mut layers = Vec::with_capacity(self.manifest.layers.len());
            for desc in &self.manifest.layers {
                let mut artifacts = LayerArtifacts::new(desc.digest.clone());
                artifacts.packages = store
                    .packages_by_layer(&desc.digest, &eco.package_scanner_infos())
                    .await?;
                artifacts.distributions = store
                    .distributions_by_layer(&desc.digest, &eco.distribution_scanner_infos())
                    .await?;
                artifacts.repositories = store
                    .repositories_by_layer(&desc.digest, &eco.repository_scanner_infos())
                    .await?;
                artifacts.whiteouts = whiteouts.get(&desc.digest).cloned().unwrap_or_default();
                layers.push(artifacts);
            }
            let partial = eco.coalescer.coalesce(&self.manifest.hash, &layers).await?;
            self.report.merge(partial);
        }
        Ok(Transition::Next(IndexState::IndexManifest))
    }

    async fn index_manifest(&mut self) -> Result<Transition> {
        let store = &self.indexer.store;
        store.index_manifest(&self.report).await?;

        self.report.state = IndexState::IndexFinished;
        self.report.success = true;
        self.report.err.clear();
        store
            .set_index_finished(&self.report, &self.scanners)
            .await?;

        info!(
            manifest = %self.manifest.hash,
            packages = self.report.packages.len(),
            "indexing finished"
        );
        counter!("strata_indexer_finished_total").increment(1);
        Ok(Transition::Done(self.report.clone()))
    }
}
