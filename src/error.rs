//! Error type shared by the pool and the index.

use thiserror::Error;

/// Errors surfaced by pool and index operations.
///
/// Contention (a lost CAS) is never an error; it is retried internally.
/// A duplicate insert is an outcome (`Ok(false)`), not an error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a strata pool.
    #[error("not a strata pool: bad magic")]
    BadMagic,
    /// The pool was written by an incompatible format version.
    #[error("pool format version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build understands.
        expected: u32,
        /// Version recorded in the pool.
        got: u32,
    },
    /// The index in the pool was built with different layout constants.
    #[error("index layout mismatch: {0}")]
    LayoutMismatch(&'static str),
    /// The index root records a different pool identity.
    #[error("pool uuid mismatch: index records {recorded:#018x}, pool is {actual:#018x}")]
    UuidMismatch {
        /// Uuid recorded in the index root.
        recorded: u64,
        /// Uuid of the opened pool.
        actual: u64,
    },
    /// The pool cannot satisfy an allocation.
    #[error("out of persistent memory: {requested} bytes requested")]
    OutOfMemory {
        /// Size of the failed allocation in bytes.
        requested: u64,
    },
    /// The requested pool size cannot hold the superblock.
    #[error("pool too small: {0} bytes")]
    PoolTooSmall(u64),
    /// An argument is outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The pool contains no index root.
    #[error("pool has no index root")]
    NoRoot,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
