//! # ferromalloc-abi
//!
//! ABI-compatible `extern "C"` boundary for the ferromalloc engine. Exports
//! `malloc`, `free`, `calloc`, and `realloc` over a process-global
//! [`ferromalloc_core::Allocator`] backed by the program break, so the
//! engine can substitute for the platform allocator (link the cdylib, or
//! `LD_PRELOAD` it).
//!
//! The global allocator is constructed `const` in a `static`: there is no
//! lazy initialization and therefore no reentrant-init hazard when these
//! symbols are the process allocator.

pub mod malloc_abi;

pub use malloc_abi::{calloc, free, global, malloc, realloc};
