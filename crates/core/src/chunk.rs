//! Chunk planning and chunk descriptors.

use crate::policy::SizePolicy;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Display name of a chunk: `chunk_{number}_of_{total}_{filename}`.
pub fn chunk_name(number: u64, total: u64, filename: &str) -> String {
    format!("chunk_{number}_of_{total}_{filename}")
}

/// Metadata describing one stored chunk of an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Position in the upload (1-indexed).
    pub chunk_number: u64,
    /// Display name derived from number, total and original filename.
    pub chunk_filename: String,
    /// Storage key the chunk bytes were written to.
    pub chunk_path: String,
    /// Size in bytes.
    pub chunk_size: u64,
}

/// A half-open byte range of the original payload assigned to one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position in the plan (1-indexed).
    pub number: u64,
    /// Total number of chunks in the plan.
    pub total: u64,
    /// Offset of the first byte.
    pub offset: u64,
    /// Number of bytes in the span.
    pub len: u64,
}

impl ChunkSpan {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// The span as an index range into an in-memory buffer.
    ///
    /// Only meaningful when the whole payload is addressable in memory.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset as usize..self.end() as usize
    }

    /// Display name of the chunk for the given original filename.
    pub fn name(&self, filename: &str) -> String {
        chunk_name(self.number, self.total, filename)
    }
}

/// Ordered partition of a payload into chunk spans.
///
/// Span `i` covers `[(i-1)*S, min(i*S, L))`; every span is non-empty and the
/// spans cover the payload exactly once, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    total_len: u64,
    chunk_size: u64,
    count: u64,
}

impl ChunkPlan {
    /// Plan the split of a payload, or `None` when it is stored whole.
    pub fn new(policy: &SizePolicy, total_len: u64) -> Option<Self> {
        if !policy.needs_chunking(total_len) {
            return None;
        }
        Some(Self {
            total_len,
            chunk_size: policy.max_chunk_size(),
            count: policy.chunk_count(total_len),
        })
    }

    /// Number of chunks in the plan (always at least 2).
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The spans in ascending order.
    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + use<> {
        let Self {
            total_len,
            chunk_size,
            count,
        } = *self;
        (1..=count).map(move |number| {
            let offset = (number - 1) * chunk_size;
            ChunkSpan {
                number,
                total: count,
                offset,
                len: chunk_size.min(total_len - offset),
            }
        })
    }
}
