//! Thread-safe allocator facade.
//!
//! [`Allocator`] wraps a [`Heap`] in a single `parking_lot::Mutex`. Every
//! public operation acquires the lock exactly once, runs the lock-free
//! engine methods, and releases it. The one lock guards the block registry,
//! the release counter, and every growth call, so heap extension is
//! serialized and no caller ever observes a torn or partially linked header.
//!
//! This is the documented throughput bottleneck: no per-thread caches, no
//! lock-free fast paths, no finer-grained locking. Per-region locks and
//! per-thread arenas are deferred design work, not defects. The lock is not
//! reentrant; a thread holding it must not re-enter the facade.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::config::ViolationPolicy;
use crate::error::ProtocolViolation;
use crate::grow::{FixedRegion, GrowHeap};
use crate::heap::Heap;
use crate::stats::{HeapStats, LifecycleRecord};

/// Lock-guarded allocator over a growth source.
pub struct Allocator<S: GrowHeap> {
    heap: Mutex<Heap<S>>,
}

impl<S: GrowHeap> Allocator<S> {
    /// Creates an allocator over `source`.
    ///
    /// `const` so a process-wide instance can live in a `static` with no
    /// lazy initialization (and therefore no reentrancy hazard when this
    /// allocator is the process allocator).
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            heap: Mutex::new(Heap::new(source)),
        }
    }

    /// Creates an allocator with a fixed violation policy.
    #[must_use]
    pub const fn with_policy(source: S, policy: ViolationPolicy) -> Self {
        Self {
            heap: Mutex::new(Heap::with_policy(source, policy)),
        }
    }

    /// Allocates `size` bytes, rounded up to the alignment boundary.
    ///
    /// Returns the payload pointer (never the header), or `None` for a zero
    /// `size` or when the growth source denies extension.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.heap.lock().allocate(size)
    }

    /// Releases the block behind `payload`. No-op on null.
    ///
    /// A double release or an unrecognized header tag is a protocol
    /// violation: reported as `Err` under [`ViolationPolicy::Report`],
    /// process-fatal under [`ViolationPolicy::Abort`].
    ///
    /// # Safety
    ///
    /// A non-null `payload` must have been returned by this allocator.
    pub unsafe fn release(&self, payload: *mut u8) -> Result<(), ProtocolViolation> {
        let Some(payload) = NonNull::new(payload) else {
            return Ok(());
        };
        // SAFETY: caller contract.
        unsafe { self.heap.lock().release(payload) }
    }

    /// Resizes the block behind `payload` to at least `size` bytes.
    ///
    /// Null behaves as [`Self::allocate`]. See [`Heap::resize`] for the
    /// in-place and copy semantics; the whole operation runs under one lock
    /// acquisition.
    ///
    /// # Safety
    ///
    /// A non-null `payload` must have been returned by this allocator.
    pub unsafe fn resize(&self, payload: *mut u8, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: caller contract.
        unsafe { self.heap.lock().resize(payload, size) }
    }

    /// Allocates `count * elem_size` bytes, zero-filled.
    ///
    /// The product is not checked for overflow (documented limitation: a
    /// wrapping multiply requests the wrapped size).
    #[must_use]
    pub fn allocate_zeroed(&self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        self.heap.lock().allocate_zeroed(count, elem_size)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Retained lifecycle records, oldest first. Allocates; inspection only.
    #[must_use]
    pub fn recent_events(&self) -> Vec<LifecycleRecord> {
        self.heap.lock().recent_events()
    }
}

impl Allocator<FixedRegion> {
    /// Allocator over a fresh fixed region of at least `capacity` bytes.
    ///
    /// The test and bench entry point: exhaustion is deterministic and the
    /// real program break is left alone.
    #[must_use]
    pub fn with_fixed_region(capacity: usize) -> Self {
        Self::with_policy(FixedRegion::with_capacity(capacity), ViolationPolicy::Report)
    }
}

// SAFETY: the heap's raw header pointers are only ever dereferenced while
// holding the mutex, and the growth source (hence the backing region) moves
// with the allocator.
unsafe impl<S: GrowHeap + Send> Send for Allocator<S> {}
// SAFETY: all shared access is serialized by the mutex.
unsafe impl<S: GrowHeap + Send> Sync for Allocator<S> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_round_trip() {
        let allocator = Allocator::with_fixed_region(4096);
        let payload = allocator.allocate(64).unwrap();
        // SAFETY: payload valid for 64 bytes.
        unsafe {
            std::ptr::write_bytes(payload.as_ptr(), 0x5A, 64);
            assert_eq!(payload.as_ptr().read(), 0x5A);
            allocator.release(payload.as_ptr()).unwrap();
        }
        assert_eq!(allocator.stats().active_count, 0);
    }

    #[test]
    fn test_release_null_is_noop() {
        let allocator = Allocator::with_fixed_region(4096);
        // SAFETY: null is explicitly allowed.
        unsafe { allocator.release(std::ptr::null_mut()).unwrap() };
        assert_eq!(allocator.stats().releases, 0);
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;

        let allocator = Arc::new(Allocator::with_fixed_region(1 << 20));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let payload = allocator.allocate(64).unwrap();
                        // SAFETY: payload is exclusively ours until released.
                        unsafe {
                            std::ptr::write_bytes(payload.as_ptr(), 1, 64);
                            allocator.release(payload.as_ptr()).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(allocator.stats().active_count, 0);
    }
}
