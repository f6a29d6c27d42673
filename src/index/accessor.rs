//! Borrow handle for a resolved slot.

use std::fmt;

use bytemuck::Pod;

use crate::index::layout::KvRecord;
use crate::index::StrataIndex;
use crate::pointer::CompoundPtr;
use crate::pool::PmemPool;

/// A transient handle to a published key–value record.
///
/// Holds the pool identity and a snapshot of the slot's compound pointer;
/// dereferencing resolves the record through the index's pool. The handle
/// carries no lock: it is a borrow of a persistent address, valid for as
/// long as the index is, since published records are never reclaimed.
pub struct Accessor<'i, K, V, P: PmemPool> {
    index: &'i StrataIndex<K, V, P>,
    kv: CompoundPtr,
    pool_uuid: u64,
}

impl<'i, K: Pod + PartialEq, V: Pod, P: PmemPool> Accessor<'i, K, V, P> {
    pub(super) fn new(index: &'i StrataIndex<K, V, P>, kv: CompoundPtr) -> Self {
        debug_assert!(!kv.is_empty());
        Self {
            index,
            kv,
            pool_uuid: index.pool().uuid(),
        }
    }

    /// The record's key.
    pub fn key(&self) -> &'i K {
        &self.record().key
    }

    /// The record's value.
    pub fn value(&self) -> &'i V {
        &self.record().value
    }

    /// Identity of the pool the record lives in.
    pub fn pool_uuid(&self) -> u64 {
        self.pool_uuid
    }

    /// The slot-word snapshot this accessor was bound to.
    pub fn raw(&self) -> CompoundPtr {
        self.kv
    }

    fn record(&self) -> &'i KvRecord<K, V> {
        self.index.record(self.kv.offset())
    }
}

impl<K: Pod + PartialEq + fmt::Debug, V: Pod + fmt::Debug, P: PmemPool> fmt::Debug
    for Accessor<'_, K, V, P>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("key", self.key())
            .field("value", self.value())
            .field("offset", &self.kv.offset())
            .field("token", &self.kv.token())
            .finish()
    }
}
