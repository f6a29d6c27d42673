//! Stable key hashing and probe-coordinate derivation.
//!
//! The hash must be deterministic across runs because tokens and probe
//! coordinates are recomputed against persisted slots after reopening a
//! pool. We do not use `DefaultHasher`.

use bytemuck::Pod;

use crate::pointer::CompoundPtr;

/// Hash key bytes into a 64-bit value (deterministic).
#[inline]
pub fn hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Hash a typed key through its byte representation.
#[inline]
pub fn hash_key<K: Pod>(key: &K) -> KeyHash {
    KeyHash::new(hash64(bytemuck::bytes_of(key)))
}

/// A 64-bit key hash with the coordinate derivations used by the probe.
///
/// The top 16 bits become the slot token, the top `segs_power` bits select
/// the primary segment of a layer, and the low bits select the primary
/// bucket inside a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyHash(u64);

impl KeyHash {
    /// Wrap a raw 64-bit hash.
    #[inline]
    pub const fn new(hash: u64) -> Self {
        Self(hash)
    }

    /// Get the raw hash value.
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Partial-hash token stored in a slot's high bits.
    ///
    /// Token 0 means "empty slot", so a derived token of 0 is mapped to 1.
    #[inline]
    pub const fn token(&self) -> u16 {
        let token = (self.0 >> CompoundPtr::OFFSET_BITS) as u16;
        if token == 0 {
            1
        } else {
            token
        }
    }

    /// Primary bucket index inside a segment.
    ///
    /// `bucket_count` must be a power of two.
    #[inline]
    pub const fn bucket(&self, bucket_count: u64) -> u64 {
        self.0 & (bucket_count - 1)
    }

    /// Primary segment index inside a layer of `segs_power`.
    ///
    /// Uses the top bits so that deeper layers spread keys across more
    /// segments without disturbing bucket selection.
    #[inline]
    pub fn segment(&self, segs_power: u32) -> u64 {
        debug_assert!(segs_power >= 1 && segs_power < 64);
        self.0 >> (64 - segs_power)
    }
}
