//! ABI layer for the allocation entry points (`malloc`, `free`, `calloc`,
//! `realloc`).
//!
//! Each symbol is a thin veneer over the process-global engine instance.
//! The C ABI has no error channel for `free`, so in report mode a protocol
//! violation is written to stderr as a single allocation-free line; in
//! strict mode (`FERROMALLOC_MODE=strict`) the engine aborts before
//! returning.
//!
//! `no_mangle` is applied only in release builds: a debug test binary that
//! exported these symbols would shadow its own allocator and recurse. The
//! functions stay callable as ordinary Rust items either way.

use std::ffi::c_void;
use std::ptr;

use ferromalloc_core::{Allocator, ProtocolViolation, Sbrk};

/// Process-global engine over the program break.
///
/// Const-constructed: the heap itself stays empty until the first growth,
/// so taking this static never allocates.
static GLOBAL: Allocator<Sbrk> = Allocator::new(Sbrk);

/// The process-global allocator behind the exported symbols.
#[must_use]
pub fn global() -> &'static Allocator<Sbrk> {
    &GLOBAL
}

/// Writes one static diagnostic line to stderr without allocating.
fn report_violation(violation: &ProtocolViolation) {
    let msg: &[u8] = match violation {
        ProtocolViolation::DoubleRelease { .. } => b"ferromalloc: double release detected\n",
        ProtocolViolation::UnrecognizedTag { .. } => {
            b"ferromalloc: unrecognized block tag on release\n"
        }
    };
    // SAFETY: writing a static buffer to stderr.
    let _ = unsafe { libc::write(2, msg.as_ptr().cast(), msg.len()) };
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// `malloc` -- allocates `size` bytes of uninitialized memory.
///
/// Returns null for a zero `size` (this allocator's contract, matching its
/// original) and on heap exhaustion.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    match GLOBAL.allocate(size) {
        Some(payload) => payload.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// `free` -- releases memory previously returned by `malloc`, `calloc`, or
/// `realloc`. No-op on null.
///
/// Release is O(1); merging of adjacent free blocks is deferred until a
/// batch of releases has accumulated.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by this allocator and not
/// already freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: caller contract; null is handled by the engine.
    if let Err(violation) = unsafe { GLOBAL.release(ptr.cast()) } {
        report_violation(&violation);
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// `realloc` -- resizes a block, moving it if it cannot stay in place.
///
/// Null `ptr` behaves as `malloc(size)`. On failure returns null and leaves
/// the original block valid.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by this allocator and not
/// already freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: caller contract.
    match unsafe { GLOBAL.resize(ptr.cast(), size) } {
        Some(payload) => payload.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// `calloc` -- allocates `nmemb * size` bytes, zero-filled.
///
/// The product is not checked for overflow (documented limitation carried
/// from the original contract).
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match GLOBAL.allocate_zeroed(nmemb, size) {
        Some(payload) => payload.as_ptr().cast(),
        None => ptr::null_mut(),
    }
}
