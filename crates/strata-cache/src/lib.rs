//! Layer cache and lock primitives for strata
//!
//! Two shared mutable resources live here: the [`LayerArena`], which stores
//! decompressed layer blobs content-addressed by digest with an LRU byte
//! budget, and the [`LockSource`] abstraction that gives the indexer
//! at-most-once semantics per key. Both enforce their own synchronization;
//! everything else in the workspace treats them as handles.

mod arena;
mod lock;

pub use arena::{LayerArena, DEFAULT_BUDGET};
pub use lock::{LocalLocks, LockGuard, LockSource};
