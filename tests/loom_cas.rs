//! Loom-based model-checked tests for the CAS publication patterns.
//!
//! These tests replicate the publish-or-free CAS discipline used on slot
//! words and on the directory chain's `next` pointer. Each test builds a
//! self-contained harness on loom atomics so loom can exhaustively
//! explore interleavings without touching production code.
//!
//! Run with:
//! ```bash
//! cargo test --test loom_cas
//! ```

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;

// ---------------------------------------------------------------------------
// Test-local harness: a slot word.
//
// A simplified model of `AtomicSlot` from `src/pointer.rs`: a packed u64
// holding a record offset and a token, CAS'd from the empty word exactly
// once.
// ---------------------------------------------------------------------------

struct Slot(AtomicU64);

impl Slot {
    fn empty() -> Self {
        Self(AtomicU64::new(0))
    }

    fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn publish(&self, word: u64) -> Result<u64, u64> {
        self.0.compare_exchange(0, word, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// Two threads race to publish into one empty slot. Exactly one must
/// succeed; the loser must observe the winner's word.
#[test]
fn test_loom_slot_publish_race() {
    loom::model(|| {
        let slot = Arc::new(Slot::empty());

        let s1 = Arc::clone(&slot);
        let s2 = Arc::clone(&slot);
        let h1 = thread::spawn(move || s1.publish(100));
        let h2 = thread::spawn(move || s2.publish(200));
        let r1 = h1.join().unwrap();
        let r2 = h2.join().unwrap();

        assert!(r1.is_ok() ^ r2.is_ok(), "exactly one publication wins");
        let published = slot.load();
        match (r1, r2) {
            (Ok(_), Err(seen)) => {
                assert_eq!(published, 100);
                assert_eq!(seen, 100, "loser must observe the winner");
            }
            (Err(seen), Ok(_)) => {
                assert_eq!(published, 200);
                assert_eq!(seen, 200, "loser must observe the winner");
            }
            _ => unreachable!(),
        }
    });
}

/// A reader that observes a published slot must also observe the record
/// bytes written before publication (flush-then-CAS ordering).
#[test]
fn test_loom_record_visible_before_slot() {
    loom::model(|| {
        let record = Arc::new(AtomicU64::new(0));
        let slot = Arc::new(Slot::empty());

        let writer_record = Arc::clone(&record);
        let writer_slot = Arc::clone(&slot);
        let writer = thread::spawn(move || {
            // Construct the record, then publish the slot.
            writer_record.store(0xfeed, Ordering::Relaxed);
            writer_slot.publish(1).unwrap();
        });

        let reader_record = Arc::clone(&record);
        let reader_slot = Arc::clone(&slot);
        let reader = thread::spawn(move || {
            if reader_slot.load() != 0 {
                // The Acquire load of the slot synchronizes with the
                // AcqRel CAS, so the record write is visible.
                assert_eq!(reader_record.load(Ordering::Relaxed), 0xfeed);
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
    });
}

// ---------------------------------------------------------------------------
// Test-local harness: chain extension.
//
// A simplified model of `extend_chain` from `src/index/grow.rs`: each
// thread "allocates" a layer, CAS-installs it on the tail's `next`
// pointer, and frees its allocation if it lost.
// ---------------------------------------------------------------------------

struct ExtendHarness {
    next: AtomicU64,
    allocs: AtomicU64,
    frees: AtomicU64,
}

impl ExtendHarness {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    fn extend(&self, layer: u64) {
        if self.next.load(Ordering::Acquire) != 0 {
            return; // another thread already extended
        }
        self.allocs.fetch_add(1, Ordering::Relaxed);
        if self
            .next
            .compare_exchange(0, layer, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.frees.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Concurrent chain extensions leak nothing: every allocation except the
/// winner's is freed, and exactly one layer ends up installed.
#[test]
fn test_loom_extend_race_frees_loser() {
    loom::model(|| {
        let harness = Arc::new(ExtendHarness::new());

        let h1 = {
            let h = Arc::clone(&harness);
            thread::spawn(move || h.extend(10))
        };
        let h2 = {
            let h = Arc::clone(&harness);
            thread::spawn(move || h.extend(20))
        };
        h1.join().unwrap();
        h2.join().unwrap();

        let installed = harness.next.load(Ordering::Acquire);
        assert!(installed == 10 || installed == 20);

        let allocs = harness.allocs.load(Ordering::Relaxed);
        let frees = harness.frees.load(Ordering::Relaxed);
        assert_eq!(allocs - frees, 1, "exactly the installed layer survives");
    });
}
