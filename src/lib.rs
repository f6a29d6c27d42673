//! strata - a crash-consistent layered hash index for persistent memory
//!
//! A memory-mapped pool holds key–value records published into
//! cache-line buckets through single-word CAS. The index is organized as
//! an append-only chain of directory layers: when a key's probe window
//! is exhausted, a deeper layer with more segments is CAS-installed at
//! the tail instead of rehashing an old one. After a crash, the chain is
//! recovered by walking forward from the persistent root; every insert
//! whose call returned is still found.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata::{config::IndexOptions, MappedPool, StrataIndex};
//!
//! let pool = Arc::new(MappedPool::create("data.pool", 256 << 20)?);
//! let index = StrataIndex::<u64, u64, _>::create(pool, &IndexOptions::default())?;
//!
//! index.insert(7, 700)?;
//! let entry = index.find(&7).unwrap();
//! assert_eq!(*entry.value(), 700);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod pointer;
pub mod pool;
pub mod workload;
mod utility;

pub use error::{Error, Result};
pub use index::{Accessor, StrataIndex};
pub use pointer::{AtomicSlot, CompoundPtr};
pub use pool::{MappedPool, PmemPool};

/// Constants used throughout the library
pub mod constants {
    /// Size of a cache line in bytes
    pub const CACHE_LINE_BYTES: usize = 64;
}

/// Utility for size literals (e.g., 1 GiB)
pub mod size {
    /// 1 KiB in bytes
    pub const KIB: u64 = 1024;
    /// 1 MiB in bytes
    pub const MIB: u64 = 1024 * KIB;
    /// 1 GiB in bytes
    pub const GIB: u64 = 1024 * MIB;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::IndexOptions;
    pub use crate::error::{Error, Result};
    pub use crate::index::{Accessor, StrataIndex};
    pub use crate::pointer::CompoundPtr;
    pub use crate::pool::{MappedPool, PmemPool};
}
