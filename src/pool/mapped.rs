//! Memory-mapped reference pool.
//!
//! A pool is a single file mapped read-write. The first page holds the
//! superblock (identity, format version, allocation cursor, root offset);
//! everything after it is the allocation region. Durability is
//! `flush_range` on the mapping, which is the platform's writeback
//! barrier for the mapped byte range.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::utility::pad_alignment;

use super::PmemPool;

/// `b"STRATAPM"` interpreted little-endian.
const POOL_MAGIC: u64 = u64::from_le_bytes(*b"STRATAPM");

/// On-media format version.
const POOL_VERSION: u32 = 1;

/// Bytes reserved for the superblock; allocations start after it.
const HEADER_LEN: u64 = 4096;

/// Smallest pool worth creating: superblock plus one allocation page.
const MIN_POOL_LEN: u64 = HEADER_LEN + 4096;

/// Persistent pool header, resident at offset 0.
#[repr(C)]
struct Superblock {
    magic: u64,
    version: u32,
    _reserved: u32,
    uuid: u64,
    len: u64,
    /// Next unreserved offset. Durably advanced before an allocation is
    /// handed out, so a crash mid-construction leaks, never aliases.
    cursor: AtomicU64,
    /// Offset of the pool's root object, 0 = none published.
    root: AtomicU64,
}

const _: () = assert!(mem::size_of::<Superblock>() as u64 <= HEADER_LEN);

/// A file-backed byte-addressable pool.
#[derive(Debug)]
pub struct MappedPool {
    mmap: MmapMut,
    base: *mut u8,
    len: u64,
    path: PathBuf,
    _file: File,
    /// Volatile size-class free lists. Blocks freed here were never
    /// published; losing the list on crash leaks them.
    free_lists: Mutex<HashMap<u64, Vec<u64>>>,
    allocs: AtomicU64,
    frees: AtomicU64,
}

// SAFETY: `base` points into the mapping owned by `mmap`, which lives as
// long as `self`. All shared mutation of mapped state goes through
// atomics; the free lists are behind a mutex.
unsafe impl Send for MappedPool {}
unsafe impl Sync for MappedPool {}

impl MappedPool {
    /// Create a fresh pool file of `len` bytes.
    ///
    /// Truncates any existing file at `path`. The superblock is durable
    /// before this returns.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        if len < MIN_POOL_LEN {
            return Err(Error::PoolTooSmall(len));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len)?;

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        let (hi, lo) = Uuid::new_v4().as_u64_pair();
        let uuid = match hi ^ lo {
            0 => 1,
            u => u,
        };

        // SAFETY: the mapping is at least HEADER_LEN bytes and exclusively
        // owned until this constructor returns.
        unsafe {
            let sb = base as *mut Superblock;
            ptr::addr_of_mut!((*sb).magic).write(POOL_MAGIC);
            ptr::addr_of_mut!((*sb).version).write(POOL_VERSION);
            ptr::addr_of_mut!((*sb)._reserved).write(0);
            ptr::addr_of_mut!((*sb).uuid).write(uuid);
            ptr::addr_of_mut!((*sb).len).write(len);
            ptr::addr_of_mut!((*sb).cursor).write(AtomicU64::new(HEADER_LEN));
            ptr::addr_of_mut!((*sb).root).write(AtomicU64::new(0));
        }
        mmap.flush_range(0, HEADER_LEN as usize)?;

        tracing::info!(path = %path.display(), len, uuid = %format_args!("{uuid:#018x}"), "pool created");

        Ok(Self {
            mmap,
            base,
            len,
            path,
            _file: file,
            free_lists: Mutex::new(HashMap::new()),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        })
    }

    /// Open an existing pool file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < MIN_POOL_LEN {
            return Err(Error::PoolTooSmall(file_len));
        }

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        // SAFETY: the mapping is at least HEADER_LEN bytes.
        let sb = unsafe { &*(base as *const Superblock) };
        if sb.magic != POOL_MAGIC {
            return Err(Error::BadMagic);
        }
        if sb.version != POOL_VERSION {
            return Err(Error::VersionMismatch {
                expected: POOL_VERSION,
                got: sb.version,
            });
        }
        let len = sb.len;
        if len != file_len {
            return Err(Error::LayoutMismatch("pool length does not match file"));
        }
        let cursor = sb.cursor.load(Ordering::Acquire);
        if cursor < HEADER_LEN || cursor > len {
            return Err(Error::LayoutMismatch("allocation cursor out of range"));
        }

        tracing::info!(
            path = %path.display(),
            len,
            uuid = %format_args!("{:#018x}", sb.uuid),
            used = cursor - HEADER_LEN,
            "pool opened"
        );

        Ok(Self {
            mmap,
            base,
            len,
            path,
            _file: file,
            free_lists: Mutex::new(HashMap::new()),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn superblock(&self) -> &Superblock {
        // SAFETY: the mapping is at least HEADER_LEN bytes and outlives
        // `self`; superblock fields are only mutated through atomics
        // after construction.
        unsafe { &*(self.base as *const Superblock) }
    }

    /// Free-list size class for a request: 8-byte granules.
    fn size_class(len: u64) -> u64 {
        pad_alignment(len.max(8), 8)
    }
}

impl PmemPool for MappedPool {
    fn uuid(&self) -> u64 {
        self.superblock().uuid
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn is_empty(&self) -> bool {
        self.superblock().cursor.load(Ordering::Acquire) == HEADER_LEN
    }

    fn alloc(&self, len: u64, align: u64) -> Result<u64> {
        let size = Self::size_class(len);
        let align = align.max(8);

        let recycled = {
            let mut lists = self.free_lists.lock();
            lists.get_mut(&size).and_then(|list| list.pop())
        };
        if let Some(offset) = recycled {
            if offset % align == 0 {
                // Recycled blocks carry stale bytes; hand them out
                // durably zeroed like fresh ones.
                // SAFETY: the block belongs to the free list, so no other
                // thread can reference it.
                unsafe { ptr::write_bytes(self.resolve(offset), 0, size as usize) };
                self.flush(offset, size)?;
                self.allocs.fetch_add(1, Ordering::Relaxed);
                return Ok(offset);
            }
            self.free_lists.lock().entry(size).or_default().push(offset);
        }

        let sb = self.superblock();
        loop {
            let cursor = sb.cursor.load(Ordering::Acquire);
            let offset = pad_alignment(cursor, align);
            let end = match offset.checked_add(size) {
                Some(end) if end <= self.len => end,
                _ => return Err(Error::OutOfMemory { requested: size }),
            };
            if sb
                .cursor
                .compare_exchange(cursor, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Durably advance the cursor before handing out the block.
                // Fresh file pages are zero, so no explicit clear is needed.
                self.flush(mem::offset_of!(Superblock, cursor) as u64, 8)?;
                self.allocs.fetch_add(1, Ordering::Relaxed);
                return Ok(offset);
            }
        }
    }

    fn free(&self, offset: u64, len: u64) {
        let size = Self::size_class(len);
        self.free_lists.lock().entry(size).or_default().push(offset);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    fn store_u64(&self, offset: u64, value: u64) -> Result<()> {
        // SAFETY: callers hand in 8-aligned in-pool offsets of words that
        // are only accessed atomically.
        unsafe { super::atomic_at(self, offset) }.store(value, Ordering::Release);
        self.flush(offset, 8)
    }

    fn flush(&self, offset: u64, len: u64) -> Result<()> {
        debug_assert!(offset + len <= self.len);
        self.mmap.flush_range(offset as usize, len as usize)?;
        Ok(())
    }

    fn resolve(&self, offset: u64) -> *mut u8 {
        debug_assert!(offset < self.len);
        // SAFETY: offset is within the mapping.
        unsafe { self.base.add(offset as usize) }
    }

    fn set_root(&self, offset: u64) -> Result<()> {
        self.superblock().root.store(offset, Ordering::Release);
        self.flush(mem::offset_of!(Superblock, root) as u64, 8)
    }

    fn root(&self) -> u64 {
        self.superblock().root.load(Ordering::Acquire)
    }

    fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let result = f()?;
        self.mmap.flush()?;
        Ok(result)
    }

    fn alloc_count(&self) -> u64 {
        self.allocs.load(Ordering::Relaxed)
    }

    fn free_count(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }
}

impl Drop for MappedPool {
    fn drop(&mut self) {
        if let Err(err) = self.mmap.flush() {
            tracing::warn!(path = %self.path.display(), error = %err, "flush on pool close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_pool(len: u64) -> (tempfile::TempDir, MappedPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = MappedPool::create(dir.path().join("test.pool"), len).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_create_initializes_superblock() {
        let (_dir, pool) = temp_pool(1 << 20);
        assert_ne!(pool.uuid(), 0);
        assert_eq!(pool.len(), 1 << 20);
        assert!(pool.is_empty());
        assert_eq!(pool.root(), 0);
    }

    #[test]
    fn test_create_rejects_tiny_pool() {
        let dir = tempfile::tempdir().unwrap();
        let err = MappedPool::create(dir.path().join("tiny.pool"), 100).unwrap_err();
        assert!(matches!(err, Error::PoolTooSmall(100)));
    }

    #[test]
    fn test_alloc_is_aligned_and_zeroed() {
        let (_dir, pool) = temp_pool(1 << 20);
        let offset = pool.alloc(100, 64).unwrap();
        assert_eq!(offset % 64, 0);
        let bytes = unsafe { std::slice::from_raw_parts(pool.resolve(offset), 100) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(!pool.is_empty());
        assert_eq!(pool.alloc_count(), 1);
    }

    #[test]
    fn test_alloc_out_of_memory() {
        let (_dir, pool) = temp_pool(MIN_POOL_LEN);
        let err = pool.alloc(1 << 20, 8).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }

    #[test]
    fn test_free_then_alloc_reuses_block() {
        let (_dir, pool) = temp_pool(1 << 20);
        let a = pool.alloc(256, 8).unwrap();
        // Dirty the block, free it, and check the recycled copy is clean.
        unsafe { ptr::write_bytes(pool.resolve(a), 0xab, 256) };
        pool.free(a, 256);
        let b = pool.alloc(256, 8).unwrap();
        assert_eq!(a, b);
        let bytes = unsafe { std::slice::from_raw_parts(pool.resolve(b), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_root_and_cursor_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.pool");
        let (uuid, first) = {
            let pool = MappedPool::create(&path, 1 << 20).unwrap();
            let off = pool.alloc(128, 8).unwrap();
            pool.set_root(off).unwrap();
            (pool.uuid(), off)
        };

        let pool = MappedPool::open(&path).unwrap();
        assert_eq!(pool.uuid(), uuid);
        assert_eq!(pool.root(), first);
        // A post-reopen allocation must not overlap the first one.
        let second = pool.alloc(128, 8).unwrap();
        assert!(second >= first + 128);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pool");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![0x5a; MIN_POOL_LEN as usize]).unwrap();
        drop(file);

        let err = MappedPool::open(&path).unwrap_err();
        assert!(matches!(err, Error::BadMagic));
    }

    #[test]
    fn test_store_u64_is_visible() {
        let (_dir, pool) = temp_pool(1 << 20);
        let off = pool.alloc(8, 8).unwrap();
        pool.store_u64(off, 0xdead_beef).unwrap();
        let word = unsafe { super::super::atomic_at(&pool, off) }.load(Ordering::Acquire);
        assert_eq!(word, 0xdead_beef);
    }
}
