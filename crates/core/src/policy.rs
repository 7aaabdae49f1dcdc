//! Size policy deciding whether and how a payload is split.

use crate::error::{Error, Result};
use std::num::NonZeroU64;

const DEFAULT_LIMIT: NonZeroU64 = match NonZeroU64::new(crate::DEFAULT_MAX_CHUNK_SIZE) {
    Some(limit) => limit,
    None => panic!("default chunk size must be non-zero"),
};

/// The process-wide chunking threshold.
///
/// A payload is split only when it is strictly larger than the maximum chunk
/// size; a payload of exactly `max_chunk_size` bytes is stored whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizePolicy {
    max_chunk_size: NonZeroU64,
}

impl SizePolicy {
    /// Create a policy, rejecting a zero threshold.
    pub fn new(max_chunk_size: u64) -> Result<Self> {
        NonZeroU64::new(max_chunk_size)
            .map(|max_chunk_size| Self { max_chunk_size })
            .ok_or_else(|| {
                Error::Configuration("max_chunk_size must be a positive number of bytes".into())
            })
    }

    /// The maximum size of a single chunk in bytes.
    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size.get()
    }

    /// Whether a payload of `len` bytes has to be split.
    pub fn needs_chunking(&self, len: u64) -> bool {
        len > self.max_chunk_size.get()
    }

    /// Number of pieces a payload of `len` bytes produces.
    ///
    /// Always at least 1; an unchunked payload counts as a single piece.
    pub fn chunk_count(&self, len: u64) -> u64 {
        if self.needs_chunking(len) {
            len.div_ceil(self.max_chunk_size.get())
        } else {
            1
        }
    }
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_zero_threshold_rejected() {
        let err = SizePolicy::new(0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_default_threshold_is_25_mib() {
        assert_eq!(SizePolicy::default().max_chunk_size(), 25 * MIB);
    }

    #[test]
    fn test_boundary_is_exclusive() {
        let policy = SizePolicy::new(100).unwrap();
        assert!(!policy.needs_chunking(0));
        assert!(!policy.needs_chunking(99));
        assert!(!policy.needs_chunking(100));
        assert!(policy.needs_chunking(101));
    }

    #[test]
    fn test_chunk_count() {
        let policy = SizePolicy::new(100).unwrap();
        assert_eq!(policy.chunk_count(0), 1);
        assert_eq!(policy.chunk_count(100), 1);
        assert_eq!(policy.chunk_count(101), 2);
        assert_eq!(policy.chunk_count(200), 2);
        assert_eq!(policy.chunk_count(201), 3);
    }

    #[test]
    fn test_thirty_mib_makes_two_chunks() {
        let policy = SizePolicy::default();
        assert!(policy.needs_chunking(30 * MIB));
        assert_eq!(policy.chunk_count(30 * MIB), 2);
        assert!(!policy.needs_chunking(10 * MIB));
    }

    #[test]
    fn test_chunk_count_does_not_overflow() {
        let policy = SizePolicy::new(1).unwrap();
        assert_eq!(policy.chunk_count(u64::MAX), u64::MAX);
    }
}
