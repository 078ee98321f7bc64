//! # ferromalloc-core
//!
//! A drop-in dynamic-memory allocator engine: first-fit search over an
//! address-ordered block list, splitting, deferred coalescing, and a single
//! lock, backed by one growable memory region.
//!
//! The four operations — [`Allocator::allocate`], [`Allocator::release`],
//! [`Allocator::resize`], [`Allocator::allocate_zeroed`] — are shaped to
//! match the conventional allocation ABI so the engine can stand in for a
//! platform's default allocator (the `ferromalloc-abi` crate exports the
//! `extern "C"` symbols). Each heap is an explicit context over a
//! [`GrowHeap`] source: [`Sbrk`] for the real program break, [`FixedRegion`]
//! for isolated heaps in tests and benchmarks.
//!
//! Deliberate limits: one global lock per heap (no per-thread caches, no
//! size classes), memory is never returned to the environment, and
//! corruption detection is a pair of plain magic words, not a cryptographic
//! scheme.

pub mod allocator;
pub mod block;
pub mod config;
pub mod error;
pub mod grow;
pub mod heap;
pub mod stats;

pub use allocator::Allocator;
pub use block::{ALIGNMENT, BlockHeader, HEADER_SIZE, align_up};
pub use config::{ViolationPolicy, violation_policy};
pub use error::ProtocolViolation;
pub use grow::{FixedRegion, GrowHeap};
#[cfg(unix)]
pub use grow::Sbrk;
pub use heap::{COALESCE_THRESHOLD, Heap};
pub use stats::{HeapStats, LifecycleRecord, LogLevel};
