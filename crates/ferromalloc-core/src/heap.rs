//! Allocator engine: block registry, first-fit search, splitting,
//! coalescing, and the deferred-coalescing policy.
//!
//! A [`Heap`] is one allocator context: it owns the address-ordered header
//! list, the release counter, and the growth source, so independent heaps
//! can coexist (tests run many). Nothing here locks; [`crate::Allocator`]
//! serializes callers. Engine methods take `&mut self` and must not be
//! reentered — resize composes with allocate/release through these methods
//! precisely because the facade lock is not reentrant.
//!
//! List invariants maintained throughout: blocks are linked in strict
//! address order with each header's `next` sitting exactly `total_size`
//! bytes above it; after a coalescing pass no two adjacent entries are both
//! free; header storage is never returned to the environment.

use std::ptr::{self, NonNull};

use crate::block::{
    ALIGNMENT, BlockHeader, HEADER_SIZE, STATUS_ALLOCATED, STATUS_FREE, TAG_FREED, TAG_FRESH,
    TAG_REUSED, align_up, tag_recognized,
};
use crate::config::{self, ViolationPolicy};
use crate::error::ProtocolViolation;
use crate::grow::GrowHeap;
use crate::stats::{HeapStats, LifecycleLog, LifecycleRecord, LogLevel};

/// Releases between deferred coalescing passes.
pub const COALESCE_THRESHOLD: u32 = 10;

/// One allocator context: list head, release counter, growth source.
///
/// The heap only ever grows. Headers created here live for the rest of the
/// heap's life; coalescing absorbs a header's extent into its neighbor and
/// unlinks it, nothing more.
pub struct Heap<S: GrowHeap> {
    source: S,
    /// First header in address order; null until the heap first grows.
    head: *mut BlockHeader,
    /// Releases since the last coalescing pass.
    free_count: u32,
    /// `None` defers to the process-wide [`config::violation_policy`].
    policy: Option<ViolationPolicy>,
    stats: HeapStats,
    log: LifecycleLog,
}

impl<S: GrowHeap> Heap<S> {
    /// Creates an empty heap over `source`.
    ///
    /// `const` so a process-global heap can live in a `static` with no
    /// lazy initialization.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            source,
            head: ptr::null_mut(),
            free_count: 0,
            policy: None,
            stats: HeapStats::new(),
            log: LifecycleLog::new(),
        }
    }

    /// Creates an empty heap with a fixed violation policy (tests use this
    /// to observe violations regardless of the environment).
    #[must_use]
    pub const fn with_policy(source: S, policy: ViolationPolicy) -> Self {
        let mut heap = Self::new(source);
        heap.policy = Some(policy);
        heap
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Retained lifecycle records, oldest first. Allocates; inspection only.
    #[must_use]
    pub fn recent_events(&self) -> Vec<LifecycleRecord> {
        self.log.snapshot()
    }

    fn effective_policy(&self) -> ViolationPolicy {
        self.policy.unwrap_or_else(config::violation_policy)
    }

    // -----------------------------------------------------------------------
    // Free-block finder
    // -----------------------------------------------------------------------

    /// First-fit walk from the head.
    ///
    /// Returns the first free header with `size >= aligned`, plus the last
    /// header visited before it (free or not) so a miss can link the grown
    /// block as the new tail. A miss is the growth trigger, not an error.
    fn find_free_block(
        &self,
        aligned: usize,
    ) -> (Option<NonNull<BlockHeader>>, Option<NonNull<BlockHeader>>) {
        let mut last = None;
        let mut current = self.head;
        while let Some(block) = NonNull::new(current) {
            // SAFETY: list links only ever point at headers this heap wrote,
            // and header storage is never destroyed.
            let header = unsafe { block.as_ref() };
            if header.status == STATUS_FREE && header.size >= aligned {
                return (Some(block), last);
            }
            last = Some(block);
            current = header.next;
        }
        (None, last)
    }

    // -----------------------------------------------------------------------
    // Growth
    // -----------------------------------------------------------------------

    /// Extends the heap by one block of `aligned` payload bytes and links it
    /// after `last` (the current tail, or nothing for the first block).
    fn request_block(
        &mut self,
        last: Option<NonNull<BlockHeader>>,
        aligned: usize,
    ) -> Option<NonNull<BlockHeader>> {
        let total = HEADER_SIZE.checked_add(aligned)?;
        let Some(region) = self.source.grow(total) else {
            self.log.record(LifecycleRecord {
                level: LogLevel::Error,
                symbol: "allocate",
                event: "grow_fail",
                addr: None,
                size: Some(aligned),
                outcome: "exhausted",
                active_count: self.stats.active_count,
                total_allocated: self.stats.total_allocated,
            });
            return None;
        };
        if let Some(last) = last {
            // SAFETY: last is a live header; single heap-break contract.
            let last_end = last.as_ptr() as usize + unsafe { last.as_ref() }.total_size();
            debug_assert_eq!(
                region.as_ptr() as usize,
                last_end,
                "growth source violated the single heap-break contract"
            );
        }
        let block = region.cast::<BlockHeader>();
        // SAFETY: the source handed us `total` fresh bytes starting at
        // `region`, aligned to the heap alignment, so a header fits at the
        // front; `last` (when present) is the live tail header.
        unsafe {
            block.as_ptr().write(BlockHeader {
                size: aligned,
                next: ptr::null_mut(),
                prev: last.map_or(ptr::null_mut(), NonNull::as_ptr),
                status: STATUS_ALLOCATED,
                tag: TAG_FRESH,
            });
            if let Some(last) = last {
                (*last.as_ptr()).next = block.as_ptr();
            }
        }
        self.stats.grow_calls += 1;
        self.log.record(LifecycleRecord {
            level: LogLevel::Debug,
            symbol: "allocate",
            event: "grow",
            addr: Some(block.as_ptr() as usize),
            size: Some(aligned),
            outcome: "fresh",
            active_count: self.stats.active_count,
            total_allocated: self.stats.total_allocated,
        });
        Some(block)
    }

    // -----------------------------------------------------------------------
    // Splitter
    // -----------------------------------------------------------------------

    /// Carves an `aligned`-sized block out of a larger free block.
    ///
    /// Splits only when the leftover payload would be at least one alignment
    /// unit after paying for the remainder's header; below that the leftover
    /// is not independently addressable and the whole block is handed over
    /// (accepted internal fragmentation).
    ///
    /// # Safety
    ///
    /// `block` must be a live header in this heap's list.
    unsafe fn split_block(&mut self, block: NonNull<BlockHeader>, aligned: usize) {
        // SAFETY: caller contract; the header is live and exclusively ours.
        let header = unsafe { &mut *block.as_ptr() };
        if header.size < aligned + HEADER_SIZE + ALIGNMENT {
            return;
        }
        let remainder_size = header.size - aligned - HEADER_SIZE;
        // SAFETY: the remainder header starts `HEADER_SIZE + aligned` bytes
        // into an extent of `HEADER_SIZE + header.size` bytes, and the check
        // above guarantees it fits together with at least ALIGNMENT bytes of
        // payload.
        unsafe {
            let remainder = block
                .as_ptr()
                .cast::<u8>()
                .add(HEADER_SIZE + aligned)
                .cast::<BlockHeader>();
            remainder.write(BlockHeader {
                size: remainder_size,
                next: header.next,
                prev: block.as_ptr(),
                status: STATUS_FREE,
                tag: TAG_FREED,
            });
            if let Some(next) = NonNull::new(header.next) {
                (*next.as_ptr()).prev = remainder;
            }
            header.next = remainder;
        }
        header.size = aligned;
        self.stats.splits += 1;
    }

    // -----------------------------------------------------------------------
    // Deferred coalescing policy
    // -----------------------------------------------------------------------

    /// One full left-to-right merge pass; resets the release counter.
    fn coalesce_pass(&mut self) {
        let mut current = self.head;
        while let Some(block) = NonNull::new(current) {
            // SAFETY: walking headers owned by this heap; coalesce returns
            // the header now representing the merged extent, so the walk
            // never revisits absorbed nodes.
            let block = unsafe {
                if (*block.as_ptr()).status == STATUS_FREE {
                    coalesce(block)
                } else {
                    block
                }
            };
            // SAFETY: block is the (possibly merged) live header.
            current = unsafe { (*block.as_ptr()).next };
        }
        self.free_count = 0;
        self.stats.coalesce_passes += 1;
        self.log.record(LifecycleRecord {
            level: LogLevel::Debug,
            symbol: "allocate",
            event: "coalesce_pass",
            addr: None,
            size: None,
            outcome: "merged",
            active_count: self.stats.active_count,
            total_allocated: self.stats.total_allocated,
        });
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Allocates `size` bytes, rounded up to the alignment boundary.
    ///
    /// Returns `None` for a zero `size` and when the growth source denies an
    /// extension; no state is mutated in either case (a deferred coalescing
    /// pass that was already due may still run).
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if self.free_count >= COALESCE_THRESHOLD {
            self.coalesce_pass();
        }
        let aligned = align_up(size);
        let block = if self.head.is_null() {
            let block = self.request_block(None, aligned)?;
            self.head = block.as_ptr();
            block
        } else {
            let (found, last) = self.find_free_block(aligned);
            match found {
                Some(block) => {
                    // SAFETY: found is a live free header in our list.
                    unsafe {
                        self.split_block(block, aligned);
                        let header = &mut *block.as_ptr();
                        header.status = STATUS_ALLOCATED;
                        header.tag = TAG_REUSED;
                    }
                    self.stats.reuse_hits += 1;
                    block
                }
                None => self.request_block(last, aligned)?,
            }
        };
        // SAFETY: block is live; its recorded size reflects any split.
        self.stats.total_allocated += unsafe { block.as_ref() }.size;
        self.stats.active_count += 1;
        Some(BlockHeader::payload(block))
    }

    /// Marks the block behind `payload` free. O(1): merge work is deferred.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by this heap and not belong to a
    /// region whose `FixedRegion` source has been dropped. (Releasing a
    /// stale or foreign pointer is exactly what the tag validation exists to
    /// catch, but a pointer into unmapped memory is still undefined.)
    pub unsafe fn release(&mut self, payload: NonNull<u8>) -> Result<(), ProtocolViolation> {
        // SAFETY: caller contract; header storage is never destroyed.
        let block = unsafe { BlockHeader::from_payload(payload) };
        // SAFETY: block points into heap storage we own.
        let header = unsafe { &mut *block.as_ptr() };
        let addr = payload.as_ptr() as usize;
        if header.status != STATUS_ALLOCATED {
            return self.violation(ProtocolViolation::DoubleRelease { addr });
        }
        if !tag_recognized(header.tag) {
            return self.violation(ProtocolViolation::UnrecognizedTag {
                addr,
                tag: header.tag,
            });
        }
        header.status = STATUS_FREE;
        header.tag = TAG_FREED;
        self.free_count += 1;
        self.stats.releases += 1;
        self.stats.total_allocated -= header.size;
        self.stats.active_count -= 1;
        Ok(())
    }

    /// Resizes the block behind `payload` to at least `size` bytes.
    ///
    /// Null behaves as [`Self::allocate`]. A block whose recorded size
    /// already satisfies the aligned request is returned unchanged — no
    /// shrink, no split on shrink, no absorption of an adjacent free
    /// neighbor. Otherwise a new block is allocated, exactly the old
    /// recorded size is copied (never the new request — the source buffer
    /// ends there), and the old block is released. On allocation failure
    /// returns `None` with the original block untouched and still valid.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::release`] for non-null `payload`.
    pub unsafe fn resize(&mut self, payload: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let Some(payload) = NonNull::new(payload) else {
            return self.allocate(size);
        };
        // SAFETY: caller contract.
        let block = unsafe { BlockHeader::from_payload(payload) };
        // SAFETY: block points into heap storage we own.
        let old_size = unsafe { block.as_ref() }.size;
        if old_size >= align_up(size) {
            return Some(payload);
        }
        let new_payload = self.allocate(size)?;
        // SAFETY: the old payload is valid for its recorded `old_size`
        // bytes, the new payload for at least `align_up(size) > old_size`
        // bytes, and distinct blocks never overlap.
        unsafe {
            ptr::copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), old_size);
        }
        // SAFETY: same pointer the caller handed in.
        if let Err(violation) = unsafe { self.release(payload) } {
            // The source header failed release validation after the copy;
            // the new block is already live, so surface the event in the
            // lifecycle ring rather than dropping the allocation.
            self.log.record(LifecycleRecord {
                level: LogLevel::Warn,
                symbol: "resize",
                event: "stale_source",
                addr: Some(violation.addr()),
                size: Some(old_size),
                outcome: "kept_new_block",
                active_count: self.stats.active_count,
                total_allocated: self.stats.total_allocated,
            });
        }
        Some(new_payload)
    }

    /// Allocates `count * elem_size` bytes and zero-fills them.
    ///
    /// The product is not checked for overflow; a wrapping multiply requests
    /// the wrapped size.
    pub fn allocate_zeroed(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let total = count.wrapping_mul(elem_size);
        let payload = self.allocate(total)?;
        // SAFETY: the payload is valid for at least `total` bytes.
        unsafe {
            ptr::write_bytes(payload.as_ptr(), 0, total);
        }
        Some(payload)
    }

    fn violation(&mut self, violation: ProtocolViolation) -> Result<(), ProtocolViolation> {
        self.log.record(LifecycleRecord {
            level: LogLevel::Error,
            symbol: "release",
            event: "violation",
            addr: Some(violation.addr()),
            size: None,
            outcome: match violation {
                ProtocolViolation::DoubleRelease { .. } => "double_release",
                ProtocolViolation::UnrecognizedTag { .. } => "unrecognized_tag",
            },
            active_count: self.stats.active_count,
            total_allocated: self.stats.total_allocated,
        });
        if self.effective_policy().aborts() {
            fatal_violation(&violation);
        }
        Err(violation)
    }
}

/// Merges `block` with its free neighbors: forward first, then backward.
///
/// Both merges may apply in one call. Returns the header that now represents
/// the merged extent so a list walk can continue without revisiting absorbed
/// nodes.
///
/// # Safety
///
/// `block` must be a live header in a heap's list, with no other reference
/// to the list active.
unsafe fn coalesce(block: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
    // SAFETY: caller contract; every pointer chased below is either null or
    // a live header in the same list.
    let header = unsafe { &mut *block.as_ptr() };
    if let Some(next) = NonNull::new(header.next) {
        // SAFETY: distinct header, no aliasing with `header`.
        let next_header = unsafe { &mut *next.as_ptr() };
        if next_header.status == STATUS_FREE {
            header.size += HEADER_SIZE + next_header.size;
            header.next = next_header.next;
            if let Some(after) = NonNull::new(header.next) {
                // SAFETY: live header past the absorbed one.
                unsafe { (*after.as_ptr()).prev = block.as_ptr() };
            }
        }
    }
    let mut merged = block;
    if let Some(prev) = NonNull::new(header.prev) {
        // SAFETY: distinct header, no aliasing with `header`.
        let prev_header = unsafe { &mut *prev.as_ptr() };
        if prev_header.status == STATUS_FREE {
            prev_header.size += HEADER_SIZE + header.size;
            prev_header.next = header.next;
            if let Some(after) = NonNull::new(header.next) {
                // SAFETY: live header past the absorbed one.
                unsafe { (*after.as_ptr()).prev = prev.as_ptr() };
            }
            merged = prev;
        }
    }
    merged
}

/// Terminates the process on a protocol violation under the abort policy.
///
/// The stderr write must not allocate: this can run inside the process
/// allocator, under its lock.
fn fatal_violation(violation: &ProtocolViolation) -> ! {
    let msg: &[u8] = match violation {
        ProtocolViolation::DoubleRelease { .. } => b"ferromalloc: fatal: double release\n",
        ProtocolViolation::UnrecognizedTag { .. } => b"ferromalloc: fatal: unrecognized block tag\n",
    };
    #[cfg(unix)]
    // SAFETY: writing a static buffer to stderr.
    let _ = unsafe { libc::write(2, msg.as_ptr().cast(), msg.len()) };
    #[cfg(not(unix))]
    let _ = msg;
    std::process::abort()
}
