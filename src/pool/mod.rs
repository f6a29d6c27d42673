//! Persistent pool abstraction.
//!
//! This module defines the allocator contract the index consumes. A pool
//! is a byte-addressable persistent region identified by a 64-bit uuid;
//! offsets inside it are stable across process restarts and resolve to
//! in-process addresses for the currently mapped pool.
//!
//! The index only ever relies on these guarantees:
//! - allocations are durably reserved and zeroed before they are handed
//!   out, so a crash mid-construction leaks a block but never aliases it;
//! - an 8-byte store plus flush is atomic with respect to power failure;
//! - a range flush makes prior stores to that range durable.

use std::mem;
use std::ptr;
use std::sync::atomic::AtomicU64;

use bytemuck::Pod;

use crate::error::Result;

mod mapped;

pub use mapped::MappedPool;

/// Contract between the index and a persistent pool.
///
/// The reference implementation is [`MappedPool`]; the index is generic
/// over this trait so the same core runs against any byte-addressable
/// store with durable-write primitives.
pub trait PmemPool: Send + Sync + 'static {
    /// The pool's 64-bit identity, stable across reopen.
    fn uuid(&self) -> u64;

    /// Total pool length in bytes.
    fn len(&self) -> u64;

    /// Whether the pool holds no allocations yet.
    fn is_empty(&self) -> bool;

    /// Durably reserve `len` zeroed bytes at the given alignment.
    ///
    /// The reservation cursor is made durable before the offset is
    /// returned. Returns [`crate::Error::OutOfMemory`] when the pool
    /// cannot satisfy the request.
    fn alloc(&self, len: u64, align: u64) -> Result<u64>;

    /// Return a block to the pool.
    ///
    /// Only ever called on blocks that were never published; the free
    /// list is volatile, so blocks freed in a session that crashes are
    /// leaked, never corrupted.
    fn free(&self, offset: u64, len: u64);

    /// 8-byte atomic store followed by a durable flush of the same word.
    fn store_u64(&self, offset: u64, value: u64) -> Result<()>;

    /// Durably flush a byte range.
    fn flush(&self, offset: u64, len: u64) -> Result<()>;

    /// Resolve a pool offset to an in-process address.
    fn resolve(&self, offset: u64) -> *mut u8;

    /// Durably publish the offset of the pool's root object.
    ///
    /// This is the commit point for composite initialization: everything
    /// the root references must be durable before this store.
    fn set_root(&self, offset: u64) -> Result<()>;

    /// Offset of the pool's root object, 0 if none was published.
    fn root(&self) -> u64;

    /// Run `f`, then make every store it issued durable.
    ///
    /// Combined with a final [`set_root`](Self::set_root) this gives
    /// crash-atomic creation: a crash inside `f` leaves the root
    /// unpublished and the pool logically empty.
    fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R>;

    /// Number of allocations served since the pool was opened.
    fn alloc_count(&self) -> u64;

    /// Number of blocks returned since the pool was opened.
    fn free_count(&self) -> u64;
}

/// Allocate and durably construct a typed object; returns its offset.
pub fn alloc_value<P: PmemPool, T: Pod>(pool: &P, value: &T) -> Result<u64> {
    let len = mem::size_of::<T>() as u64;
    let offset = pool.alloc(len, mem::align_of::<T>() as u64)?;
    // SAFETY: the block was just reserved for us and is not yet visible
    // to any other thread or to persistent readers.
    unsafe {
        ptr::copy_nonoverlapping(
            bytemuck::bytes_of(value).as_ptr(),
            pool.resolve(offset),
            len as usize,
        );
    }
    pool.flush(offset, len)?;
    Ok(offset)
}

/// View an 8-byte pool word as an atomic cell.
///
/// # Safety
///
/// `offset` must be 8-aligned and inside the pool, and the word must only
/// ever be accessed atomically once it is shared between threads.
pub unsafe fn atomic_at<P: PmemPool>(pool: &P, offset: u64) -> &AtomicU64 {
    debug_assert!(offset % 8 == 0 && offset + 8 <= pool.len());
    &*(pool.resolve(offset) as *const AtomicU64)
}
