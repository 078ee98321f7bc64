//! Error types for the allocator API boundary.

use thiserror::Error;

/// A release-side protocol violation.
///
/// Invalid sizes and growth denial are ordinary `None` returns; a violation
/// means the caller handed back a pointer whose header no longer vouches for
/// a live allocation, and continuing would risk corrupting unrelated live
/// blocks. The default policy surfaces the violation as an error value so
/// embedders and tests can observe it; [`crate::ViolationPolicy::Abort`]
/// terminates the process instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// The block behind the pointer is already marked free.
    #[error("double release of payload at {addr:#x}")]
    DoubleRelease {
        /// Payload address passed by the caller.
        addr: usize,
    },
    /// The header tag matches none of the recognized provenance values.
    #[error("unrecognized tag {tag:#010x} for payload at {addr:#x}")]
    UnrecognizedTag {
        /// Payload address passed by the caller.
        addr: usize,
        /// The tag word found in the header.
        tag: u32,
    },
}

impl ProtocolViolation {
    /// Payload address the violation was raised for.
    #[must_use]
    pub fn addr(&self) -> usize {
        match self {
            Self::DoubleRelease { addr } | Self::UnrecognizedTag { addr, .. } => *addr,
        }
    }
}
