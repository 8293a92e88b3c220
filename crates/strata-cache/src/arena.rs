//! Content-addressed layer blob storage
//!
//! Decompressed layer tars live as flat files under one directory, named by
//! their canonical digest. An index file records sizes and access times so
//! the arena can evict least-recently-used blobs when it grows past its byte
//! budget. The caller is expected to hold the layer's lock across the
//! miss-fetch-commit window, which is what makes fetches at-most-once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strata_core::{Digest, Error, Result};

const INDEX_FILE: &str = "index.json";

/// Default byte budget: 1 GiB
pub const DEFAULT_BUDGET: u64 = 1 << 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArenaEntry {
    size: u64,
    last_accessed: DateTime<Utc>,
}

/// On-disk arena of decompressed layer blobs, keyed by digest
pub struct LayerArena {
    root: PathBuf,
    budget: u64,
    index: Mutex<HashMap<String, ArenaEntry>>,
}

impl LayerArena {
    /// Open (or create) an arena rooted at `root`
    pub fn new(root: impl Into<PathBuf>, budget: u64) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::internal(format!("create arena dir {}: {e}", root.display())))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, "arena index unreadable, starting empty");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };

        Ok(Self {
            root,
            budget,
            index: Mutex::new(index),
        })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        // ':' is not portable in file names
        self.root.join(digest.to_string().replace(':', "-"))
    }

    /// True when the blob is present
    pub fn contains(&self, digest: &Digest) -> bool {
        self.index
            .lock()
            .expect("arena index poisoned")
            .contains_key(&digest.to_string())
    }

    /// Path to the blob, stamping its access time; `None` on a miss
    pub fn realize(&self, digest: &Digest) -> Option<PathBuf> {
        let mut index = self.index.lock().expect("arena index poisoned");
        let entry = index.get_mut(&digest.to_string())?;
        entry.last_accessed = Utc::now();
        drop(index);
        self.save_index();
        Some(self.blob_path(digest))
    }

    /// A scratch path for writing a blob before committing it
    pub fn staging_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(format!("{}.partial", digest.to_string().replace(':', "-")))
    }

    /// Move a fully-written blob into place and account for it.
    ///
    /// Commit then evicts least-recently-used blobs until the arena fits the
    /// budget again; the blob just committed is never the victim.
    pub fn commit(&self, digest: &Digest, staged: &Path) -> Result<PathBuf> {
        let dest = self.blob_path(digest);
        let size = std::fs::metadata(staged)
            .map_err(|e| Error::internal(format!("stat staged blob: {e}")))?
            .len();
        std::fs::rename(staged, &dest)
            .map_err(|e| Error::internal(format!("commit blob {digest}: {e}")))?;

        let key = digest.to_string();
        {
            let mut index = self.index.lock().expect("arena index poisoned");
            index.insert(
                key.clone(),
                ArenaEntry {
                    size,
                    last_accessed: Utc::now(),
                },
            );
            self.evict_locked(&mut index, &key);
        }
        self.save_index();
        debug!(%digest, size, "committed layer blob");
        Ok(dest)
    }

    /// Drop a blob outright
    pub fn remove(&self, digest: &Digest) {
        let key = digest.to_string();
        let mut index = self.index.lock().expect("arena index poisoned");
        if index.remove(&key).is_some() {
            let _ = std::fs::remove_file(self.blob_path(digest));
        }
        drop(index);
        self.save_index();
    }

    /// Total bytes currently accounted for
    pub fn used_bytes(&self) -> u64 {
        self.index
            .lock()
            .expect("arena index poisoned")
            .values()
            .map(|e| e.size)
            .sum()
    }

    fn evict_locked(&self, index: &mut HashMap<String, ArenaEntry>, keep: &str) {
        let mut used: u64 = index.values().map(|e| e.size).sum();
        if used <= self.budget {
            return;
        }
        let mut victims: Vec<(String, ArenaEntry)> = index
            .iter()
            .filter(|(k, _)| k.as_str() != keep)
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        victims.sort_by_key(|(_, e)| e.last_accessed);
        for (key, entry) in victims {
            if used <= self.budget {
                break;
            }
            let path = self.root.join(key.replace(':', "-"));
            let _ = std::fs::remove_file(&path);
            index.remove(&key);
            used -= entry.size;
            debug!(digest = %key, size = entry.size, "evicted layer blob");
        }
    }

    fn save_index(&self) {
        let index = self.index.lock().expect("arena index poisoned");
        match serde_json::to_string(&*index) {
            Ok(content) => {
                if let Err(e) = std::fs::write(self.root.join(INDEX_FILE), content) {
                    warn!(error = %e, "failed to persist arena index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize arena index"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Algorithm;
    use tempfile::TempDir;

    fn arena_with_budget(budget: u64) -> (LayerArena, TempDir) {
        let dir = TempDir::new().unwrap();
        let arena = LayerArena::new(dir.path(), budget).unwrap();
        (arena, dir)
    }

    fn put(arena: &LayerArena, content: &[u8]) -> Digest {
        let digest = Algorithm::Sha256.digest(content);
        let staged = arena.staging_path(&digest);
        std::fs::write(&staged, content).unwrap();
        arena.commit(&digest, &staged).unwrap();
        digest
    }

    #[test]
    fn test_commit_and_realize() {
        let (arena, _dir) = arena_with_budget(DEFAULT_BUDGET);
        let digest = put(&arena, b"layer bytes");

        assert!(arena.contains(&digest));
        let path = arena.realize(&digest).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"layer bytes");
    }

    #[test]
    fn test_miss_returns_none() {
        let (arena, _dir) = arena_with_budget(DEFAULT_BUDGET);
        let digest = Algorithm::Sha256.digest(b"never stored");
        assert!(!arena.contains(&digest));
        assert!(arena.realize(&digest).is_none());
    }

    #[test]
    fn test_eviction_respects_budget_and_spares_newest() {
        let (arena, _dir) = arena_with_budget(16);
        let old = put(&arena, b"0123456789"); // 10 bytes
        let new = put(&arena, b"abcdefghij"); // 10 bytes, pushes over budget

        assert!(arena.contains(&new));
        assert!(!arena.contains(&old));
        assert!(arena.used_bytes() <= 16);
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let digest = {
            let arena = LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap();
            put(&arena, b"persisted")
        };
        let arena = LayerArena::new(dir.path(), DEFAULT_BUDGET).unwrap();
        assert!(arena.contains(&digest));
        assert_eq!(
            std::fs::read(arena.realize(&digest).unwrap()).unwrap(),
            b"persisted"
        );
    }

    #[test]
    fn test_remove() {
        let (arena, _dir) = arena_with_budget(DEFAULT_BUDGET);
        let digest = put(&arena, b"doomed");
        arena.remove(&digest);
        assert!(!arena.contains(&digest));
        assert!(arena.realize(&digest).is_none());
    }
}
