//! Heap growth sources.
//!
//! The engine obtains memory exclusively through a [`GrowHeap`]
//! implementation. The production source is [`Sbrk`], which moves the
//! process program break; tests and benchmarks use [`FixedRegion`], a
//! preallocated region with an internal break, which keeps them off the
//! real program break (the test binary's own allocator also grows it) and
//! makes exhaustion deterministic.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::block::{ALIGNMENT, align_up};

/// A monotonically growing backing region for the heap.
///
/// # Contract
///
/// Each successful call extends a single heap-break position: the returned
/// region starts exactly where the previous one ended. The engine's
/// address-ordered block list and its coalescing both depend on this.
/// Callers serialize `grow` calls (the allocator facade holds its lock
/// across every call), and nothing is ever given back: there is no shrink.
pub trait GrowHeap {
    /// Extends the region by `len` bytes and returns the start of the new
    /// bytes, or `None` if the environment denies growth.
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

// ---------------------------------------------------------------------------
// Sbrk
// ---------------------------------------------------------------------------

/// Growth source backed by the process program break.
///
/// This is the drop-in configuration's source: it assumes the break belongs
/// to this allocator (true when the exported `malloc` family has replaced
/// the platform's). Mixing it with another brk user breaks the adjacency
/// contract.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

#[cfg(unix)]
impl GrowHeap for Sbrk {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let delta = libc::intptr_t::try_from(len).ok()?;
        // SAFETY: sbrk moves the program break; calls are serialized by the
        // facade lock, so no two extensions race.
        let prev = unsafe { libc::sbrk(delta) };
        if prev == usize::MAX as *mut libc::c_void {
            return None;
        }
        NonNull::new(prev.cast::<u8>())
    }
}

// ---------------------------------------------------------------------------
// FixedRegion
// ---------------------------------------------------------------------------

/// Growth source backed by one preallocated region.
///
/// `grow` bumps an internal break through the region and fails once the
/// capacity is spent, which makes resource exhaustion testable. The region
/// is released when the source is dropped, so a `FixedRegion` heap must not
/// outlive payload pointers handed out from it.
pub struct FixedRegion {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
    layout: Layout,
}

impl FixedRegion {
    /// Allocates a region of at least `capacity` bytes (rounded up to the
    /// alignment boundary).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the backing allocation fails.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "FixedRegion capacity must be non-zero");
        let capacity = align_up(capacity);
        let layout = Layout::from_size_align(capacity, ALIGNMENT)
            .expect("FixedRegion capacity overflows Layout");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self {
            base,
            capacity,
            brk: 0,
            layout,
        }
    }

    /// Bytes still available for growth.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

impl GrowHeap for FixedRegion {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.remaining() {
            return None;
        }
        // SAFETY: brk + len <= capacity, so the offset stays inside the
        // region this source owns.
        let start = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        self.brk += len;
        Some(start)
    }
}

impl Drop for FixedRegion {
    fn drop(&mut self) {
        // SAFETY: base was allocated with exactly this layout and is freed
        // once, here.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: the region is owned by this value alone; the raw base pointer is
// only an address, and all mutation goes through `&mut self`.
unsafe impl Send for FixedRegion {}
