//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use strata::config::IndexOptions;
use strata::{MappedPool, StrataIndex};

/// The index shape used by every suite.
pub type U64Index = StrataIndex<u64, u64, MappedPool>;

/// Create a fresh pool in a temp directory.
pub fn temp_pool(size: u64) -> (tempfile::TempDir, Arc<MappedPool>) {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(MappedPool::create(dir.path().join("test.pool"), size).unwrap());
    (dir, pool)
}

/// Tiny shape: 4 buckets per segment, 2 root segments. Every key's probe
/// window covers the whole root layer, which makes growth deterministic.
pub fn tiny_options() -> IndexOptions {
    IndexOptions::new(2, 1)
}

/// Create a pool and an index in one go.
pub fn new_index(
    size: u64,
    options: &IndexOptions,
) -> (tempfile::TempDir, Arc<MappedPool>, U64Index) {
    let (dir, pool) = temp_pool(size);
    let index = StrataIndex::create(Arc::clone(&pool), options).unwrap();
    (dir, pool, index)
}
