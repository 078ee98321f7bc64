//! Randomized allocator pressure, single- and multi-threaded.
//!
//! Deterministic and bounded: seeded xorshift sequences, fixed step counts,
//! canary patterns per slot. The single-threaded sequence also maintains a
//! side model of every live payload range and asserts pairwise disjointness
//! at each allocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use ferromalloc_core::{Allocator, align_up};
use serde_json::json;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy)]
struct LiveSlot {
    payload: *mut u8,
    size: usize,
    pattern: u8,
}

unsafe fn fill(payload: *mut u8, size: usize, pattern: u8) {
    // SAFETY: caller guarantees the payload holds `size` bytes.
    unsafe { std::ptr::write_bytes(payload, pattern, size) };
}

unsafe fn verify(payload: *mut u8, size: usize, pattern: u8) -> bool {
    // SAFETY: caller guarantees the payload holds `size` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(payload, size) };
    bytes.iter().all(|&b| b == pattern)
}

#[test]
fn randomized_sequences_hold_the_no_overlap_invariant() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;

    for seed in SEEDS {
        let allocator = Allocator::with_fixed_region(4 << 20);
        let mut rng = XorShift64::new(seed);
        let mut slots: [Option<LiveSlot>; SLOTS] = [None; SLOTS];
        // Live payload ranges (start -> aligned length).
        let mut live: HashMap<usize, usize> = HashMap::new();

        for step in 0..STEPS {
            let slot = rng.gen_range(0, SLOTS - 1);
            match slots[slot] {
                None => {
                    let size = rng.gen_range(1, 384);
                    let payload = allocator
                        .allocate(size)
                        .unwrap_or_else(|| panic!("seed={seed} step={step}: exhausted"));
                    let addr = payload.as_ptr() as usize;
                    for (&start, &len) in &live {
                        assert!(
                            addr + align_up(size) <= start || start + len <= addr,
                            "seed={seed} step={step}: new payload overlaps a live block"
                        );
                    }
                    live.insert(addr, align_up(size));
                    let pattern = ((seed as u8) ^ (step as u8)) | 1;
                    // SAFETY: payload is live for `size` bytes.
                    unsafe { fill(payload.as_ptr(), size, pattern) };
                    slots[slot] = Some(LiveSlot {
                        payload: payload.as_ptr(),
                        size,
                        pattern,
                    });
                }
                Some(existing) if rng.gen_range(0, 3) == 0 => {
                    // Resize the slot; the old prefix must survive.
                    let new_size = rng.gen_range(1, 512);
                    // SAFETY: the payload is live.
                    let resized = unsafe { allocator.resize(existing.payload, new_size) }
                        .unwrap_or_else(|| panic!("seed={seed} step={step}: resize exhausted"));
                    let kept = existing.size.min(new_size);
                    // SAFETY: resized payload holds at least `kept` bytes.
                    assert!(
                        unsafe { verify(resized.as_ptr(), kept, existing.pattern) },
                        "seed={seed} step={step}: resize lost the old prefix"
                    );
                    live.remove(&(existing.payload as usize));
                    let grew = align_up(new_size) > align_up(existing.size);
                    let reserved = if grew {
                        align_up(new_size)
                    } else {
                        // In-place result keeps its original extent.
                        align_up(existing.size)
                    };
                    live.insert(resized.as_ptr() as usize, reserved);
                    // SAFETY: resized payload holds `new_size` bytes.
                    unsafe { fill(resized.as_ptr(), new_size, existing.pattern) };
                    slots[slot] = Some(LiveSlot {
                        payload: resized.as_ptr(),
                        size: new_size,
                        pattern: existing.pattern,
                    });
                }
                Some(existing) => {
                    // SAFETY: the payload is live with `size` pattern bytes.
                    assert!(
                        unsafe { verify(existing.payload, existing.size, existing.pattern) },
                        "seed={seed} step={step}: canary corrupted before release"
                    );
                    live.remove(&(existing.payload as usize));
                    // SAFETY: the payload is live and released exactly once.
                    unsafe { allocator.release(existing.payload) }
                        .unwrap_or_else(|e| panic!("seed={seed} step={step}: {e}"));
                    slots[slot] = None;
                }
            }
        }

        for slot in slots.iter().flatten() {
            // SAFETY: remaining slots are live.
            unsafe { allocator.release(slot.payload) }.unwrap();
        }
        let stats = allocator.stats();
        assert_eq!(stats.active_count, 0, "seed={seed}: blocks leaked");

        let summary = json!({
            "seed": seed,
            "steps": STEPS,
            "grow_calls": stats.grow_calls,
            "splits": stats.splits,
            "reuse_hits": stats.reuse_hits,
            "coalesce_passes": stats.coalesce_passes,
            "releases": stats.releases,
        });
        println!("{summary}");
        assert!(stats.coalesce_passes > 0, "seed={seed}: policy never ran");
        assert!(stats.reuse_hits > 0, "seed={seed}: free list never reused");
    }
}

#[test]
fn concurrent_churn_preserves_thread_canaries() {
    const THREADS: u64 = 8;
    const CYCLES: usize = 300;
    const SLOTS: usize = 8;

    let allocator = Arc::new(Allocator::with_fixed_region(16 << 20));
    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let mut rng = XorShift64::new(id + 1);
                let pattern = 0x40 | id as u8;
                let mut slots: [Option<LiveSlot>; SLOTS] = [None; SLOTS];
                for cycle in 0..CYCLES {
                    let slot = rng.gen_range(0, SLOTS - 1);
                    match slots[slot] {
                        None => {
                            let size = rng.gen_range(16, 256);
                            let payload = allocator
                                .allocate(size)
                                .unwrap_or_else(|| panic!("thread {id}: exhausted"));
                            // SAFETY: payload is exclusively this thread's
                            // until released.
                            unsafe { fill(payload.as_ptr(), size, pattern) };
                            slots[slot] = Some(LiveSlot {
                                payload: payload.as_ptr(),
                                size,
                                pattern,
                            });
                        }
                        Some(existing) => {
                            // SAFETY: this thread owns the payload.
                            assert!(
                                unsafe {
                                    verify(existing.payload, existing.size, existing.pattern)
                                },
                                "thread {id} cycle {cycle}: foreign write detected"
                            );
                            // SAFETY: released exactly once by its owner.
                            unsafe { allocator.release(existing.payload) }.unwrap();
                            slots[slot] = None;
                        }
                    }
                }
                for slot in slots.iter().flatten() {
                    // SAFETY: this thread owns the remaining payloads.
                    assert!(unsafe { verify(slot.payload, slot.size, slot.pattern) });
                    unsafe { allocator.release(slot.payload) }.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(allocator.stats().active_count, 0);
}

#[test]
fn four_threads_of_alloc_write_release_complete() {
    // The original demonstration harness: 4 threads x 100 iterations, each
    // writing a thread-specific message into a fresh 64-byte block.
    let allocator = Arc::new(Allocator::with_fixed_region(1 << 20));
    let handles: Vec<_> = (1..=4u8)
        .map(|id| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let payload = allocator.allocate(64).unwrap();
                    let message = format!("Thread {id} - iteration {i}");
                    // SAFETY: 64-byte payload, message is shorter.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            message.as_ptr(),
                            payload.as_ptr(),
                            message.len(),
                        );
                        let bytes =
                            std::slice::from_raw_parts(payload.as_ptr(), message.len());
                        assert_eq!(bytes, message.as_bytes());
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
    assert_eq!(allocator.stats().releases, 400);
}
