//! Index creation, lookup, insert, recovery and introspection.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use crossbeam_utils::Backoff;
use parking_lot::RwLock;

use crate::config::IndexOptions;
use crate::error::{Error, Result};
use crate::hash::{hash_key, KeyHash};
use crate::index::layout::{Bucket, IndexRoot, KvRecord, LayerHeader, SegmentSlot};
use crate::index::{
    Accessor, StrataIndex, LAYER_EXPO, PROBE_BUCKETS, PROBE_SEGMENTS, SLOTS_PER_BUCKET,
};
use crate::pointer::{AtomicSlot, CompoundPtr};
use crate::pool::{self, PmemPool};

/// Outcome of one full probe of a key's window across all layers.
enum ProbeOutcome {
    /// A slot holding an equal key.
    Found(CompoundPtr),
    /// No equal key; the first empty slot observed, as a pool offset.
    Empty { slot_offset: u64 },
    /// No equal key, no empty slot; the first unmaterialized segment hit.
    NullSegment { layer_offset: u64, segment_idx: u64 },
    /// Every candidate slot is taken and every candidate segment exists.
    Exhausted,
}

impl<K: Pod + PartialEq, V: Pod, P: PmemPool> StrataIndex<K, V, P> {
    /// Create a new index inside an empty pool.
    ///
    /// The root layer's segments are materialized eagerly; only layers
    /// added by growth materialize lazily. Creation is crash-atomic: the
    /// pool's root offset is published last, after everything it
    /// references is durable.
    pub fn create(pool: Arc<P>, options: &IndexOptions) -> Result<Self> {
        options.validate()?;
        if pool.root() != 0 {
            return Err(Error::InvalidArgument("pool already holds an index"));
        }

        let bucket_count = 1u64 << options.hash_power;
        let segs = 1u64 << options.segs_power;
        let seg_slot_len = mem::size_of::<SegmentSlot>() as u64;

        let root_offset = pool.transaction(|| {
            let segments = pool.alloc(segs * seg_slot_len, 8)?;
            for idx in 0..segs {
                let arr = pool.alloc(bucket_count * mem::size_of::<Bucket>() as u64, 64)?;
                // SAFETY: the segment array is freshly reserved and not
                // yet reachable from anywhere.
                unsafe {
                    (pool.resolve(segments + idx * seg_slot_len) as *mut u64).write(arr);
                }
            }

            let layer_offset = pool.alloc(mem::size_of::<LayerHeader>() as u64, 8)?;
            // SAFETY: freshly reserved header, unreachable until the root
            // object is published.
            unsafe {
                let layer = pool.resolve(layer_offset) as *mut LayerHeader;
                ptr::addr_of_mut!((*layer).segs_power).write(options.segs_power as u64);
                ptr::addr_of_mut!((*layer).segments).write(segments);
                ptr::addr_of_mut!((*layer).prev).write(0);
                // `next` is already the zeroed word.
            }

            let root = IndexRoot {
                pool_uuid: pool.uuid(),
                hash_power: options.hash_power,
                segs_power: options.segs_power,
                slots_per_bucket: SLOTS_PER_BUCKET as u32,
                probe_buckets: PROBE_BUCKETS as u32,
                probe_segments: PROBE_SEGMENTS as u32,
                layer_expo: LAYER_EXPO,
                root_layer: layer_offset,
            };
            pool::alloc_value(pool.as_ref(), &root)
        })?;
        pool.set_root(root_offset)?;

        tracing::info!(
            hash_power = options.hash_power,
            segs_power = options.segs_power,
            "index created"
        );

        Ok(Self::attach(pool, root_offset))
    }

    /// Open the index stored in a pool, re-establishing the chain tail.
    ///
    /// Validates the pool identity and every layout constant recorded at
    /// creation, then runs [`recover`](Self::recover).
    pub fn open(pool: Arc<P>) -> Result<Self> {
        let root_offset = pool.root();
        if root_offset == 0 {
            return Err(Error::NoRoot);
        }
        // SAFETY: the root offset was durably published by `create` and
        // points at an `IndexRoot` inside this pool.
        let root = unsafe { &*(pool.resolve(root_offset) as *const IndexRoot) };
        if root.pool_uuid != pool.uuid() {
            return Err(Error::UuidMismatch {
                recorded: root.pool_uuid,
                actual: pool.uuid(),
            });
        }
        if root.hash_power == 0 || root.hash_power > 28 {
            return Err(Error::LayoutMismatch("bucket count out of range"));
        }
        if root.slots_per_bucket != SLOTS_PER_BUCKET as u32 {
            return Err(Error::LayoutMismatch("slots per bucket"));
        }
        if root.probe_buckets != PROBE_BUCKETS as u32 {
            return Err(Error::LayoutMismatch("bucket probe distance"));
        }
        if root.probe_segments != PROBE_SEGMENTS as u32 {
            return Err(Error::LayoutMismatch("segment probe distance"));
        }
        if root.layer_expo != LAYER_EXPO {
            return Err(Error::LayoutMismatch("layer growth exponent"));
        }

        let index = Self::attach(pool, root_offset);
        index.recover();
        Ok(index)
    }

    fn attach(pool: Arc<P>, root_offset: u64) -> Self {
        // SAFETY: `root_offset` addresses a published `IndexRoot`.
        let root = unsafe { &*(pool.resolve(root_offset) as *const IndexRoot) };
        let root_layer = root.root_layer;
        let bucket_count = 1u64 << root.hash_power;
        Self {
            pool,
            root_offset,
            root_layer,
            bucket_count,
            top: AtomicU64::new(root_layer),
            layers: RwLock::new(vec![root_layer]),
            _marker: PhantomData,
        }
    }

    /// Re-walk the directory chain and re-establish the in-memory tail.
    ///
    /// The chain tail is not persisted as a single field; it is derivable
    /// from the root by following `next` links, which is exactly what
    /// this does. Also rebuilds the traversal cache. Returns the chain
    /// depth.
    pub fn recover(&self) -> u64 {
        let mut chain = Vec::new();
        let mut offset = self.root_layer;
        loop {
            chain.push(offset);
            let next = self.layer(offset).next.load(Ordering::Acquire);
            if next == 0 {
                break;
            }
            offset = next;
        }
        let depth = chain.len() as u64;
        self.top.store(offset, Ordering::Release);
        *self.layers.write() = chain;
        tracing::info!(depth, "directory chain recovered");
        depth
    }

    /// Look up a key; returns a handle to its record if present.
    pub fn find(&self, key: &K) -> Option<Accessor<'_, K, V, P>> {
        match self.probe(key, hash_key(key)) {
            ProbeOutcome::Found(kv) => Some(Accessor::new(self, kv)),
            _ => None,
        }
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Insert a key–value pair if the key is absent.
    ///
    /// Returns `Ok(true)` if this call published the record, `Ok(false)`
    /// if an equal key already existed. At most one of any set of
    /// concurrent inserts of the same key returns `true`.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        self.insert_inner(&key, &value).map(|(_, inserted)| inserted)
    }

    /// Like [`insert`](Self::insert), additionally binding a handle to
    /// the winning record (this call's on success, the existing one on a
    /// duplicate).
    pub fn insert_entry(&self, key: K, value: V) -> Result<(Accessor<'_, K, V, P>, bool)> {
        let (kv, inserted) = self.insert_inner(&key, &value)?;
        Ok((Accessor::new(self, kv), inserted))
    }

    /// Replace the value stored under a key.
    ///
    /// Not wired up yet: the full design CASes the slot from the current
    /// record to a freshly written one with the token preserved, then
    /// retires the old record once no handle can reach it. Always returns
    /// `false` and has no effect.
    pub fn update(&self, _key: &K, _value: V) -> bool {
        false
    }

    /// Remove a key.
    ///
    /// Not wired up yet: the full design CASes the slot back to the empty
    /// word and retires the record once no handle can reach it. Always
    /// returns `false` and has no effect.
    pub fn erase(&self, _key: &K) -> bool {
        false
    }

    /// Total slots across all materialized bucket arrays, in all layers.
    ///
    /// Each bucket array is counted once; the layout guarantees arrays
    /// are never shared, but this is checked defensively.
    pub fn capacity(&self) -> u64 {
        let mut seen = HashSet::new();
        let mut slots = 0u64;
        let mut layer_offset = self.root_layer;
        while layer_offset != 0 {
            let layer = self.layer(layer_offset);
            let segs = 1u64 << layer.segs_power;
            for idx in 0..segs {
                let arr = self
                    .segment_slot(layer, idx)
                    .buckets
                    .load(Ordering::Acquire);
                if arr != 0 && seen.insert(arr) {
                    slots += self.bucket_count * SLOTS_PER_BUCKET as u64;
                }
            }
            layer_offset = layer.next.load(Ordering::Acquire);
        }
        slots
    }

    /// Number of layers in the directory chain.
    pub fn depth(&self) -> u64 {
        let mut depth = 0;
        let mut layer_offset = self.root_layer;
        while layer_offset != 0 {
            depth += 1;
            layer_offset = self.layer(layer_offset).next.load(Ordering::Acquire);
        }
        depth
    }

    /// Snapshot of the layer-offset traversal cache.
    ///
    /// A hint only: extensions append to it and [`recover`](Self::recover)
    /// rebuilds it; the probe and the walks above follow `next` links.
    pub fn cached_layers(&self) -> Vec<u64> {
        self.layers.read().clone()
    }

    /// Per-layer occupancy statistics. Walks every materialized bucket.
    pub fn stats(&self) -> IndexStats {
        let mut layers = Vec::new();
        let mut layer_offset = self.root_layer;
        while layer_offset != 0 {
            let layer = self.layer(layer_offset);
            let segs = 1u64 << layer.segs_power;
            let mut materialized = 0u64;
            let mut used_slots = 0u64;
            for idx in 0..segs {
                let arr = self
                    .segment_slot(layer, idx)
                    .buckets
                    .load(Ordering::Acquire);
                if arr == 0 {
                    continue;
                }
                materialized += 1;
                for bucket_idx in 0..self.bucket_count {
                    let bucket = self.bucket(arr, bucket_idx);
                    for slot in &bucket.slots {
                        if !slot.load(Ordering::Relaxed).is_empty() {
                            used_slots += 1;
                        }
                    }
                }
            }
            layers.push(LayerStats {
                segs_power: layer.segs_power as u32,
                segments: segs,
                materialized_segments: materialized,
                used_slots,
            });
            layer_offset = layer.next.load(Ordering::Acquire);
        }

        let capacity = layers
            .iter()
            .map(|l| l.materialized_segments * self.bucket_count * SLOTS_PER_BUCKET as u64)
            .sum();
        let used_slots = layers.iter().map(|l| l.used_slots).sum();
        IndexStats {
            depth: layers.len() as u64,
            capacity,
            used_slots,
            layers,
        }
    }

    /// The pool this index lives in.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Offset of the persistent root object.
    pub fn root_offset(&self) -> u64 {
        self.root_offset
    }

    // ------------------------------------------------------------------
    // Probe and insert machinery
    // ------------------------------------------------------------------

    /// Probe the key's window in every layer, root to tail.
    ///
    /// Duplicate detection covers the complete window across all layers
    /// before the caller may CAS, so two concurrent inserts of one key
    /// cannot both miss each other. An unmaterialized segment cuts short
    /// only its own layer's window: deeper layers may still hold the key.
    fn probe(&self, key: &K, hash: KeyHash) -> ProbeOutcome {
        let token = hash.token();
        let b0 = hash.bucket(self.bucket_count);
        let mut first_empty: Option<u64> = None;
        let mut first_null: Option<(u64, u64)> = None;

        let mut layer_offset = self.root_layer;
        while layer_offset != 0 {
            let layer = self.layer(layer_offset);
            let segs_mask = (1u64 << layer.segs_power) - 1;
            let s0 = hash.segment(layer.segs_power as u32);

            'segments: for s in 0..PROBE_SEGMENTS {
                let segment_idx = (s0 + s) & segs_mask;
                let arr = self
                    .segment_slot(layer, segment_idx)
                    .buckets
                    .load(Ordering::Acquire);
                if arr == 0 {
                    if first_null.is_none() {
                        first_null = Some((layer_offset, segment_idx));
                    }
                    break 'segments;
                }
                for b in 0..PROBE_BUCKETS {
                    let bucket_idx = (b0 + b) & (self.bucket_count - 1);
                    let bucket = self.bucket(arr, bucket_idx);
                    for (slot_idx, slot) in bucket.slots.iter().enumerate() {
                        let current = slot.load(Ordering::Acquire);
                        if current.is_empty() {
                            if first_empty.is_none() {
                                first_empty = Some(slot_offset(arr, bucket_idx, slot_idx));
                            }
                            continue;
                        }
                        if current.token() != token {
                            continue;
                        }
                        let record = self.record(current.offset());
                        if record.key == *key {
                            return ProbeOutcome::Found(current);
                        }
                    }
                }
            }
            layer_offset = layer.next.load(Ordering::Acquire);
        }

        if let Some(slot_offset) = first_empty {
            ProbeOutcome::Empty { slot_offset }
        } else if let Some((layer_offset, segment_idx)) = first_null {
            ProbeOutcome::NullSegment {
                layer_offset,
                segment_idx,
            }
        } else {
            ProbeOutcome::Exhausted
        }
    }

    fn insert_inner(&self, key: &K, value: &V) -> Result<(CompoundPtr, bool)> {
        let hash = hash_key(key);
        let token = hash.token();
        let record_len = mem::size_of::<KvRecord<K, V>>() as u64;
        let backoff = Backoff::new();

        loop {
            match self.probe(key, hash) {
                ProbeOutcome::Found(existing) => return Ok((existing, false)),
                ProbeOutcome::Empty { slot_offset } => {
                    // The record must be durable before the slot can
                    // reference it.
                    let kv_offset = self.alloc_record(key, value)?;
                    let published = CompoundPtr::new(kv_offset, token);
                    // SAFETY: `slot_offset` addresses an 8-aligned slot
                    // word inside a published bucket array.
                    let slot =
                        unsafe { &*(self.pool.resolve(slot_offset) as *const AtomicSlot) };
                    match slot.compare_exchange(
                        CompoundPtr::EMPTY,
                        published,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.pool.flush(slot_offset, 8)?;
                            return Ok((published, true));
                        }
                        Err(_) => {
                            // Lost the slot to a concurrent writer. Give
                            // the speculative record back and rescan the
                            // whole window, which re-runs duplicate
                            // detection against the winner.
                            self.pool.free(kv_offset, record_len);
                            backoff.spin();
                        }
                    }
                }
                ProbeOutcome::NullSegment {
                    layer_offset,
                    segment_idx,
                } => {
                    self.materialize_segment(layer_offset, segment_idx)?;
                }
                ProbeOutcome::Exhausted => {
                    self.extend_chain(hash)?;
                }
            }
        }
    }

    fn alloc_record(&self, key: &K, value: &V) -> Result<u64> {
        let len = mem::size_of::<KvRecord<K, V>>() as u64;
        let align = mem::align_of::<KvRecord<K, V>>() as u64;
        let offset = self.pool.alloc(len, align)?;
        debug_assert!(offset <= CompoundPtr::OFFSET_MASK);
        // SAFETY: the block was just reserved and is exclusively ours
        // until the slot CAS publishes it.
        unsafe {
            let record = self.pool.resolve(offset) as *mut KvRecord<K, V>;
            ptr::addr_of_mut!((*record).key).write(*key);
            ptr::addr_of_mut!((*record).value).write(*value);
        }
        self.pool.flush(offset, len)?;
        Ok(offset)
    }

    // ------------------------------------------------------------------
    // Pool-resident structure resolution
    // ------------------------------------------------------------------

    pub(super) fn layer(&self, offset: u64) -> &LayerHeader {
        debug_assert!(offset != 0);
        // SAFETY: layer offsets only come from the root object or from
        // published `next` words, both of which address fully
        // constructed, flushed headers.
        unsafe { &*(self.pool.resolve(offset) as *const LayerHeader) }
    }

    pub(super) fn segment_slot(&self, layer: &LayerHeader, idx: u64) -> &SegmentSlot {
        debug_assert!(idx < (1u64 << layer.segs_power));
        // SAFETY: `layer.segments` addresses an array of
        // `1 << segs_power` slots, zero-initialized at allocation.
        unsafe {
            &*((self.pool.resolve(layer.segments) as *const SegmentSlot).add(idx as usize))
        }
    }

    pub(super) fn bucket(&self, arr: u64, idx: u64) -> &Bucket {
        debug_assert!(idx < self.bucket_count);
        // SAFETY: `arr` was read from a published segment slot, so it
        // addresses a 64-aligned array of `bucket_count` buckets.
        unsafe { &*((self.pool.resolve(arr) as *const Bucket).add(idx as usize)) }
    }

    pub(super) fn record(&self, offset: u64) -> &KvRecord<K, V> {
        debug_assert!(offset != 0);
        // SAFETY: record offsets only come from published slot words,
        // which are CAS'd in strictly after the record is written and
        // flushed; records are never mutated or reclaimed afterwards.
        unsafe { &*(self.pool.resolve(offset) as *const KvRecord<K, V>) }
    }
}

/// Pool offset of a slot word inside a bucket array.
#[inline]
fn slot_offset(arr: u64, bucket_idx: u64, slot_idx: usize) -> u64 {
    arr + bucket_idx * mem::size_of::<Bucket>() as u64 + slot_idx as u64 * 8
}

/// Occupancy of one directory layer.
#[derive(Debug, Clone)]
pub struct LayerStats {
    /// Log2 of the layer's segment count.
    pub segs_power: u32,
    /// Total segments in the layer.
    pub segments: u64,
    /// Segments with a materialized bucket array.
    pub materialized_segments: u64,
    /// Published slots in the layer.
    pub used_slots: u64,
}

/// Occupancy of the whole directory chain.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Number of layers.
    pub depth: u64,
    /// Total slots in materialized bucket arrays.
    pub capacity: u64,
    /// Total published slots.
    pub used_slots: u64,
    /// Per-layer breakdown, root first.
    pub layers: Vec<LayerStats>,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index statistics:")?;
        writeln!(f, "  Depth: {}", self.depth)?;
        writeln!(f, "  Capacity: {}", self.capacity)?;
        writeln!(f, "  Used slots: {}", self.used_slots)?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(
                f,
                "  Layer {}: segs_power={} materialized={}/{} used={}",
                i, layer.segs_power, layer.materialized_segments, layer.segments, layer.used_slots
            )?;
        }
        Ok(())
    }
}
