//! Growth engine: segment materialization and chain extension.
//!
//! Neither path rehashes anything. Materialization fills in a segment's
//! missing bucket array; extension appends a deeper layer with twice the
//! segments. Both follow the same publish-or-free discipline: flush the
//! new structure, CAS the single word that makes it reachable, flush that
//! word; a lost CAS frees the speculative allocation and adopts the
//! winner's structure.

use std::mem;
use std::ptr;
use std::sync::atomic::Ordering;

use bytemuck::Pod;

use crate::error::Result;
use crate::hash::KeyHash;
use crate::index::layout::{Bucket, LayerHeader, SegmentSlot, LAYER_NEXT_OFFSET};
use crate::index::{StrataIndex, LAYER_EXPO};
use crate::pool::PmemPool;

impl<K: Pod + PartialEq, V: Pod, P: PmemPool> StrataIndex<K, V, P> {
    /// Materialize a segment's bucket array if it is still missing.
    ///
    /// Returns `Ok(())` whether this thread, or a concurrent one, ended
    /// up providing the array; the caller re-probes either way.
    pub(super) fn materialize_segment(&self, layer_offset: u64, segment_idx: u64) -> Result<()> {
        let layer = self.layer(layer_offset);
        let slot = self.segment_slot(layer, segment_idx);
        if slot.buckets.load(Ordering::Acquire) != 0 {
            return Ok(());
        }

        let arr_len = self.bucket_count * mem::size_of::<Bucket>() as u64;
        // Allocations are handed out durably zeroed, and a zeroed bucket
        // array is exactly an array of empty slots: nothing to flush
        // before publication.
        let arr = self.pool.alloc(arr_len, 64)?;

        match slot
            .buckets
            .compare_exchange(0, arr, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let word =
                    layer.segments + segment_idx * mem::size_of::<SegmentSlot>() as u64;
                self.pool.flush(word, 8)?;
                tracing::debug!(segment = segment_idx, "segment materialized");
            }
            Err(_) => {
                self.pool.free(arr, arr_len);
            }
        }
        Ok(())
    }

    /// Append a deeper layer to the directory chain, then materialize the
    /// probing key's primary segment in the new tail.
    ///
    /// Old layers are never touched; lookups simply walk one layer
    /// deeper from now on.
    pub(super) fn extend_chain(&self, hash: KeyHash) -> Result<()> {
        // Chase the cached tail to the authoritative one.
        let mut tail_offset = self.top.load(Ordering::Acquire);
        loop {
            let next = self.layer(tail_offset).next.load(Ordering::Acquire);
            if next == 0 {
                break;
            }
            tail_offset = next;
        }
        let tail = self.layer(tail_offset);

        let segs_power = tail.segs_power + LAYER_EXPO as u64;
        let segs = 1u64 << segs_power;
        let segments_len = segs * mem::size_of::<SegmentSlot>() as u64;
        let header_len = mem::size_of::<LayerHeader>() as u64;

        let segments = self.pool.alloc(segments_len, 8)?;
        let layer_offset = self.pool.alloc(header_len, 8)?;
        // SAFETY: the header block was just reserved and is unreachable
        // until the CAS below publishes it.
        unsafe {
            let layer = self.pool.resolve(layer_offset) as *mut LayerHeader;
            ptr::addr_of_mut!((*layer).segs_power).write(segs_power);
            ptr::addr_of_mut!((*layer).segments).write(segments);
            ptr::addr_of_mut!((*layer).prev).write(tail_offset);
            // `next` is already the zeroed word; the segment array is
            // durably zero as allocated.
        }
        self.pool.flush(layer_offset, header_len)?;

        match tail
            .next
            .compare_exchange(0, layer_offset, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.pool.flush(tail_offset + LAYER_NEXT_OFFSET, 8)?;
                self.top.store(layer_offset, Ordering::Release);
                self.layers.write().push(layer_offset);
                if tracing::enabled!(tracing::Level::INFO) {
                    tracing::info!(segs, "directory chain extended");
                }
            }
            Err(winner) => {
                self.pool.free(layer_offset, header_len);
                self.pool.free(segments, segments_len);
                self.top.store(winner, Ordering::Release);
                tracing::debug!("chain extension lost to a concurrent thread");
            }
        }

        // Fall through to materializing the key's primary segment in the
        // (now deeper) tail so the retried probe finds room.
        let mut new_tail = tail_offset;
        loop {
            let next = self.layer(new_tail).next.load(Ordering::Acquire);
            if next == 0 {
                break;
            }
            new_tail = next;
        }
        let primary = hash.segment(self.layer(new_tail).segs_power as u32);
        self.materialize_segment(new_tail, primary)
    }
}
