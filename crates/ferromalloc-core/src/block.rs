//! Block header layout and payload accessors.
//!
//! Every heap block is a header immediately followed by its payload. The
//! header records the aligned payload size, the doubly linked neighbors in
//! address order, an allocation status word, and a provenance tag used to
//! catch releases of corrupted or already-freed blocks. Headers are written
//! in place at the start of each region handed out by the growth source and
//! are never individually destroyed: coalescing folds a header's extent into
//! its neighbor's `size` and unlinks it, but the bytes stay part of the heap.
//!
//! All header/payload address reasoning lives in this module. Status and tag
//! are stored as raw `u32` words rather than enums so that a corrupted header
//! read from memory can never manufacture an invalid discriminant; the rest
//! of the crate compares against the named constants below.

use std::mem;
use std::ptr::NonNull;

/// Alignment boundary for payload sizes and block placement.
pub const ALIGNMENT: usize = 16;

/// Size of the block header in bytes.
///
/// A multiple of [`ALIGNMENT`], so payloads inherit the same alignment as
/// the headers that precede them.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(mem::align_of::<BlockHeader>() == ALIGNMENT);

/// Status word: the block's payload is on the free list.
pub const STATUS_FREE: u32 = 1;

/// Status word: the block's payload belongs to a caller.
pub const STATUS_ALLOCATED: u32 = 0;

/// Tag word: block carved from fresh heap growth.
pub const TAG_FRESH: u32 = 0x1234_5678;

/// Tag word: block handed back out from the free list.
pub const TAG_REUSED: u32 = 0x7777_7777;

/// Tag word: block sitting on the free list (set on release and on split
/// remainders).
pub const TAG_FREED: u32 = 0x5555_5555;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Returns whether `tag` is a value this allocator ever stamps into an
/// allocated block. Anything else in an allocated header means the header
/// was overwritten (or the pointer never came from this heap).
#[must_use]
pub const fn tag_recognized(tag: u32) -> bool {
    tag == TAG_FRESH || tag == TAG_REUSED
}

/// Metadata record immediately preceding every payload.
///
/// The `align(16)` repr pads the struct to a [`ALIGNMENT`] multiple, which is
/// the fixed padding the layout relies on: `payload = header + HEADER_SIZE`.
#[repr(C, align(16))]
#[derive(Debug)]
pub struct BlockHeader {
    /// Aligned payload byte count. Excludes the header itself.
    pub size: usize,
    /// Next block in address order; null at the tail.
    pub next: *mut BlockHeader,
    /// Previous block in address order; null at the head.
    pub prev: *mut BlockHeader,
    /// [`STATUS_FREE`] or [`STATUS_ALLOCATED`].
    pub status: u32,
    /// Provenance tag ([`TAG_FRESH`], [`TAG_REUSED`], [`TAG_FREED`]).
    pub tag: u32,
}

impl BlockHeader {
    /// Total extent of the block: header plus payload.
    #[must_use]
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.size
    }

    /// Payload address for a header: the first byte past it.
    #[must_use]
    pub fn payload(header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: the payload begins immediately after the header within the
        // same heap region, so the offset stays in bounds of that region.
        unsafe { NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    /// Recovers the header sitting at a fixed negative offset before `payload`.
    ///
    /// This is the single conversion point for the payload-to-header
    /// direction; nothing else in the crate does this arithmetic.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer previously produced by [`Self::payload`]
    /// for a block whose header storage is still part of the heap. (Headers
    /// are never destroyed, so any pointer this allocator has handed out
    /// qualifies; a foreign pointer does not.)
    #[must_use]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        // SAFETY: per the caller contract the header lives exactly
        // HEADER_SIZE bytes before the payload.
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>()) }
    }
}
