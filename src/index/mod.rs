//! The layered hash index.
//!
//! A directory chain of layers maps keys to persistent records. Each
//! layer holds `2^segs_power` segments; each segment lazily materializes
//! an array of cache-line buckets; each bucket holds eight slot words.
//! Lookups and inserts probe a fixed window of segments and buckets per
//! layer, across every layer from the root to the deepest tail. When a
//! key's window is exhausted the chain grows a deeper layer instead of
//! rehashing an old one.
//!
//! Note: this file only holds the index type and its wiring; the lookup
//! and insert engines live in `core.rs` and the growth engine in
//! `grow.rs`.

use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pool::MappedPool;

mod accessor;
mod core;
mod grow;
mod layout;

pub use accessor::Accessor;
pub use self::core::{IndexStats, LayerStats};
pub use layout::{Bucket, IndexRoot, KvRecord, LayerHeader, SegmentSlot};

/// Number of slots per bucket.
pub const SLOTS_PER_BUCKET: usize = 8;

/// Number of consecutive buckets probed per segment.
pub const PROBE_BUCKETS: u64 = 4;

/// Number of consecutive segments probed per layer.
pub const PROBE_SEGMENTS: u64 = 4;

/// Power-of-two increment in segment count per new layer.
pub const LAYER_EXPO: u32 = 1;

/// A crash-consistent concurrent hash index living inside a pool.
///
/// Any number of threads may call [`find`](Self::find) and
/// [`insert`](Self::insert) concurrently; the hot path takes no locks.
/// Keys and values are stored by value in the pool, so both must be
/// plain-old-data.
#[derive(Debug)]
pub struct StrataIndex<K, V, P = MappedPool> {
    /// The pool every persistent object lives in.
    pool: Arc<P>,
    /// Offset of the persistent [`IndexRoot`].
    root_offset: u64,
    /// Offset of the root directory layer (cached from the root object).
    root_layer: u64,
    /// Buckets per segment (cached from the root object).
    bucket_count: u64,
    /// Offset of the deepest layer this process has observed. A hint:
    /// the authoritative tail is reached by following `next` links.
    top: AtomicU64,
    /// Traversal cache of layer offsets, root first. Appended by the
    /// winner of a chain extension, rebuilt by [`recover`](Self::recover).
    layers: RwLock<Vec<u64>>,
    _marker: PhantomData<fn(K, V) -> (K, V)>,
}
