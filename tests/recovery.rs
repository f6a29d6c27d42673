//! Reopening a pool and re-establishing the chain tail.

use std::sync::Arc;

use strata::config::IndexOptions;
use strata::{Error, MappedPool, PmemPool, StrataIndex};

mod common;

use common::{tiny_options, U64Index};

#[test]
fn test_reopen_finds_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.pool");

    const KEYS: u64 = 150;
    let (depth, capacity, uuid) = {
        let pool = Arc::new(MappedPool::create(&path, 64 << 20).unwrap());
        let index = U64Index::create(Arc::clone(&pool), &tiny_options()).unwrap();
        for key in 0..KEYS {
            assert!(index.insert(key, key * 2).unwrap());
        }
        let depth = index.depth();
        assert!(depth > 1, "150 keys into 64 root slots must grow the chain");
        (depth, index.capacity(), pool.uuid())
    };

    let pool = Arc::new(MappedPool::open(&path).unwrap());
    assert_eq!(pool.uuid(), uuid);
    let index = U64Index::open(pool).unwrap();

    assert_eq!(index.depth(), depth);
    assert_eq!(index.capacity(), capacity);
    for key in 0..KEYS {
        let entry = index.find(&key).expect("key lost across reopen");
        assert_eq!(*entry.value(), key * 2);
    }
    assert_eq!(index.stats().used_slots, KEYS);
}

#[test]
fn test_reopened_index_accepts_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("continue.pool");

    {
        let pool = Arc::new(MappedPool::create(&path, 64 << 20).unwrap());
        let index = U64Index::create(Arc::clone(&pool), &tiny_options()).unwrap();
        for key in 0..40u64 {
            index.insert(key, key).unwrap();
        }
    }

    let pool = Arc::new(MappedPool::open(&path).unwrap());
    let index = U64Index::open(pool).unwrap();

    for key in 40..120u64 {
        assert!(index.insert(key, key).unwrap());
    }
    assert!(!index.insert(10, 999).unwrap(), "pre-reopen keys are duplicates");
    for key in 0..120u64 {
        assert!(index.contains(&key));
    }
}

#[test]
fn test_recover_is_idempotent() {
    let (_dir, _pool, index) = common::new_index(64 << 20, &tiny_options());

    for key in 0..100u64 {
        index.insert(key, key).unwrap();
    }
    let depth = index.depth();
    assert_eq!(index.recover(), depth);
    assert_eq!(index.recover(), depth);
    assert_eq!(index.cached_layers().len() as u64, depth);
    for key in 0..100u64 {
        assert!(index.contains(&key));
    }
}

#[test]
fn test_recover_rebuilds_traversal_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.pool");

    {
        let pool = Arc::new(MappedPool::create(&path, 64 << 20).unwrap());
        let index = U64Index::create(Arc::clone(&pool), &tiny_options()).unwrap();
        for key in 0..100u64 {
            index.insert(key, key).unwrap();
        }
    }

    let pool = Arc::new(MappedPool::open(&path).unwrap());
    let index = U64Index::open(pool).unwrap();
    // `open` runs recovery: the cache must already reflect the full chain.
    assert_eq!(index.cached_layers().len() as u64, index.depth());
    assert!(index.depth() > 1);
}

#[test]
fn test_open_validates_key_value_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shape.pool");

    {
        let pool = Arc::new(MappedPool::create(&path, 16 << 20).unwrap());
        let index = U64Index::create(Arc::clone(&pool), &tiny_options()).unwrap();
        index.insert(1, 1).unwrap();
    }

    // Same layout constants, different key/value types: the root object
    // validates the recorded constants, which do not cover element types,
    // so this opens; the probe constants are what the format pins down.
    let pool = Arc::new(MappedPool::open(&path).unwrap());
    let reopened = StrataIndex::<u64, u64, _>::open(pool).unwrap();
    assert!(reopened.contains(&1));
}

#[test]
fn test_open_empty_pool_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(MappedPool::create(dir.path().join("empty.pool"), 16 << 20).unwrap());
    let err = U64Index::open(pool).unwrap_err();
    assert!(matches!(err, Error::NoRoot));
}

#[test]
fn test_options_recorded_in_pool_win_over_caller() {
    // Reopening never takes shape options; they are read from the root
    // object. A pool created with the tiny shape keeps it after reopen.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recorded.pool");

    {
        let pool = Arc::new(MappedPool::create(&path, 16 << 20).unwrap());
        let index = U64Index::create(Arc::clone(&pool), &IndexOptions::new(2, 1)).unwrap();
        index.insert(5, 55).unwrap();
    }

    let pool = Arc::new(MappedPool::open(&path).unwrap());
    let index = U64Index::open(pool).unwrap();
    assert_eq!(index.capacity(), 64);
    assert_eq!(*index.find(&5).unwrap().value(), 55);
}
