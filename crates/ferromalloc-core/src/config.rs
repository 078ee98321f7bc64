//! Runtime policy configuration.
//!
//! The violation policy is set via the `FERROMALLOC_MODE` environment
//! variable:
//! - `report` (default): a protocol violation (double release, unrecognized
//!   tag) is returned as an explicit error value at the API boundary. The
//!   heap is left as it was; the offending block is not touched.
//! - `strict` (alias `abort`): a protocol violation terminates the process
//!   immediately, before any further heap mutation.
//!
//! Resolution must not allocate: the policy can be consulted while this
//! allocator *is* the process allocator, holding its own lock. `std::env`
//! builds owned strings, so the variable is read through `libc::getenv`
//! instead, and the result is cached in an atomic with a non-blocking
//! resolution state machine (a reentrant call during resolution gets the
//! default).

use std::sync::atomic::{AtomicU8, Ordering};

/// How the allocator responds to a protocol violation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationPolicy {
    /// Return the violation as an error value. The default.
    #[default]
    Report,
    /// Terminate the process immediately (fail-fast).
    Abort,
}

impl ViolationPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "strict" | "abort" | "fatal" => Self::Abort,
            _ => Self::Report,
        }
    }

    /// Returns true if a violation terminates the process.
    #[must_use]
    pub const fn aborts(self) -> bool {
        matches!(self, Self::Abort)
    }
}

// Atomic cache: 0=unresolved, 1=Report, 2=Abort, 255=resolving.
static CACHED_POLICY: AtomicU8 = AtomicU8::new(0);

const POLICY_UNRESOLVED: u8 = 0;
const POLICY_REPORT: u8 = 1;
const POLICY_ABORT: u8 = 2;
const POLICY_RESOLVING: u8 = 255;

fn policy_to_u8(policy: ViolationPolicy) -> u8 {
    match policy {
        ViolationPolicy::Report => POLICY_REPORT,
        ViolationPolicy::Abort => POLICY_ABORT,
    }
}

fn u8_to_policy(v: u8) -> ViolationPolicy {
    match v {
        POLICY_ABORT => ViolationPolicy::Abort,
        _ => ViolationPolicy::Report,
    }
}

/// Reads `FERROMALLOC_MODE` without allocating.
#[cfg(unix)]
fn read_mode_env() -> ViolationPolicy {
    // SAFETY: getenv takes a nul-terminated name and returns either null or
    // a pointer into the environment block, valid for the duration of the
    // read below.
    let raw = unsafe { libc::getenv(c"FERROMALLOC_MODE".as_ptr()) };
    if raw.is_null() {
        return ViolationPolicy::Report;
    }
    // SAFETY: getenv returned a non-null, nul-terminated string.
    let bytes = unsafe { std::ffi::CStr::from_ptr(raw) }.to_bytes();
    if bytes.eq_ignore_ascii_case(b"strict")
        || bytes.eq_ignore_ascii_case(b"abort")
        || bytes.eq_ignore_ascii_case(b"fatal")
    {
        ViolationPolicy::Abort
    } else {
        ViolationPolicy::Report
    }
}

#[cfg(not(unix))]
fn read_mode_env() -> ViolationPolicy {
    ViolationPolicy::Report
}

/// Get the configured violation policy (reads the env var on first call,
/// caches thereafter).
///
/// A reentrant call that arrives while another thread is resolving gets
/// [`ViolationPolicy::Report`], the safe default.
#[must_use]
pub fn violation_policy() -> ViolationPolicy {
    let cached = CACHED_POLICY.load(Ordering::Relaxed);

    // Fast path: already resolved.
    if cached != POLICY_UNRESOLVED && cached != POLICY_RESOLVING {
        return u8_to_policy(cached);
    }

    if cached == POLICY_RESOLVING {
        return ViolationPolicy::Report;
    }

    // Try to claim the resolution slot.
    if CACHED_POLICY
        .compare_exchange(
            POLICY_UNRESOLVED,
            POLICY_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        // Lost the race; whoever won either finished or is mid-resolution.
        let now = CACHED_POLICY.load(Ordering::Relaxed);
        return if now == POLICY_RESOLVING || now == POLICY_UNRESOLVED {
            ViolationPolicy::Report
        } else {
            u8_to_policy(now)
        };
    }

    let resolved = read_mode_env();
    CACHED_POLICY.store(policy_to_u8(resolved), Ordering::Release);
    resolved
}
