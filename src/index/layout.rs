//! Persistent layout of the directory chain.
//!
//! Everything in this module lives inside the pool and is reinterpreted
//! in place from mapped memory. Structures are published bottom-up: a
//! writer flushes the contents, CAS-installs the single pointer word that
//! makes them reachable, then flushes that word. Readers therefore never
//! observe partially initialized state.

use std::mem;
use std::sync::atomic::AtomicU64;

use crate::constants::CACHE_LINE_BYTES;
use crate::index::SLOTS_PER_BUCKET;
use crate::pointer::AtomicSlot;

/// A cache-line-aligned bucket of slot words.
///
/// Slot order carries no meaning; a slot is either the empty word or a
/// published compound pointer.
#[repr(C, align(64))]
pub struct Bucket {
    /// The slot words.
    pub slots: [AtomicSlot; SLOTS_PER_BUCKET],
}

impl Bucket {
    /// Create an empty bucket.
    ///
    /// Pool-resident buckets are never constructed this way; they come
    /// into existence as zeroed pool memory, which is the same bit
    /// pattern.
    pub const fn new() -> Self {
        Self {
            slots: [
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
                AtomicSlot::empty(),
            ],
        }
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(mem::size_of::<Bucket>() == CACHE_LINE_BYTES);
const _: () = assert!(mem::align_of::<Bucket>() == CACHE_LINE_BYTES);

/// One entry of a layer's segment array.
///
/// Holds the offset of the segment's bucket array; 0 means the segment
/// has not been materialized yet. Transitions 0 → offset exactly once,
/// by CAS, and never shrinks back.
#[repr(C)]
pub struct SegmentSlot {
    /// Offset of the bucket array, 0 = not yet materialized.
    pub buckets: AtomicU64,
}

const _: () = assert!(mem::size_of::<SegmentSlot>() == 8);

/// Header of one directory layer.
///
/// Immutable once installed, except for `next` which is CAS'd from 0 to
/// the offset of the succeeding (deeper) layer exactly once.
#[repr(C)]
pub struct LayerHeader {
    /// Log2 of this layer's segment count.
    pub segs_power: u64,
    /// Offset of the `[SegmentSlot; 1 << segs_power]` array.
    pub segments: u64,
    /// Offset of the shallower layer, 0 for the root.
    pub prev: u64,
    /// Offset of the deeper layer, 0 while this layer is the tail.
    pub next: AtomicU64,
}

const _: () = assert!(mem::size_of::<LayerHeader>() == 32);

/// Byte offset of the `next` word inside a [`LayerHeader`].
pub(crate) const LAYER_NEXT_OFFSET: u64 = mem::offset_of!(LayerHeader, next) as u64;

/// The index's persistent root object.
///
/// Records the pool identity and every constant that shapes the
/// persisted layout, so that opening validates the pool was written by a
/// compatible build.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndexRoot {
    /// Identity of the pool this index was created in.
    pub pool_uuid: u64,
    /// Log2 of the per-segment bucket count.
    pub hash_power: u32,
    /// Log2 of the root layer's segment count.
    pub segs_power: u32,
    /// Slots per bucket the index was built with.
    pub slots_per_bucket: u32,
    /// Buckets probed per segment the index was built with.
    pub probe_buckets: u32,
    /// Segments probed per layer the index was built with.
    pub probe_segments: u32,
    /// Per-layer segment-count increment the index was built with.
    pub layer_expo: u32,
    /// Offset of the root directory layer.
    pub root_layer: u64,
}

const _: () = assert!(mem::size_of::<IndexRoot>() == 40);

/// A key–value record, stored by value in the pool.
///
/// Fully written and flushed before any slot references it; never
/// mutated afterwards.
#[repr(C)]
pub struct KvRecord<K, V> {
    /// The key.
    pub key: K,
    /// The value.
    pub value: V,
}
