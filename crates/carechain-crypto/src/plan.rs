//! Chunk layout computed up front from total length and chunk size.
//!
//! Every chunk's position is known before any cipher work starts, so chunks can
//! be sealed or opened in any order and reassembled by index.

use carechain_core::{CarechainError, CarechainResult};
use std::ops::Range;

use crate::TAG_SIZE;

/// One chunk: its index and byte range in the buffer the plan was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    pub range: Range<usize>,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Ordered chunk spans over a plaintext or ciphertext buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    spans: Vec<ChunkSpan>,
}

impl ChunkPlan {
    /// Plan over plaintext: `chunk_size` bytes per chunk, last chunk may be shorter.
    ///
    /// An empty plaintext still gets one (empty) chunk so the record carries a tag.
    pub fn for_plaintext(len: usize, chunk_size: u32) -> CarechainResult<Self> {
        let chunk_size = checked_chunk_size(chunk_size)?;
        if len == 0 {
            return Ok(Self {
                spans: vec![ChunkSpan {
                    index: 0,
                    range: 0..0,
                }],
            });
        }
        Self::build(0, len, chunk_size)
    }

    /// Plan over a ciphertext blob: each chunk is `chunk_size + TAG_SIZE` bytes,
    /// last chunk may be shorter. An empty blob has no chunks.
    pub fn for_ciphertext(len: usize, chunk_size: u32) -> CarechainResult<Self> {
        let stride = checked_chunk_size(chunk_size)? + TAG_SIZE;
        Self::build(0, len, stride)
    }

    /// Plan over one window of a plaintext stream whose first chunk is
    /// `first_index`. Ranges are relative to the window buffer.
    pub fn plaintext_window(first_index: u64, len: usize, chunk_size: u32) -> CarechainResult<Self> {
        Self::build(first_index, len, checked_chunk_size(chunk_size)?)
    }

    /// Ciphertext counterpart of [`ChunkPlan::plaintext_window`].
    pub fn ciphertext_window(first_index: u64, len: usize, chunk_size: u32) -> CarechainResult<Self> {
        let stride = checked_chunk_size(chunk_size)? + TAG_SIZE;
        Self::build(first_index, len, stride)
    }

    fn build(first_index: u64, len: usize, stride: usize) -> CarechainResult<Self> {
        let count = len.div_ceil(stride);
        let last = first_index.saturating_add(count as u64);
        if count > 0 && last - 1 > u64::from(u32::MAX) {
            return Err(CarechainError::input(format!(
                "{len} bytes from chunk {first_index} needs chunks past {}, more than the 32-bit chunk counter allows",
                u32::MAX
            )));
        }

        let spans = (0..count)
            .map(|i| {
                let start = i * stride;
                let end = (start + stride).min(len);
                ChunkSpan {
                    index: (first_index + i as u64) as u32,
                    range: start..end,
                }
            })
            .collect();

        Ok(Self { spans })
    }

    pub fn spans(&self) -> &[ChunkSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

fn checked_chunk_size(chunk_size: u32) -> CarechainResult<usize> {
    if chunk_size == 0 {
        return Err(CarechainError::input("chunk_size must be > 0"));
    }
    Ok(chunk_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_byte_under_chunk_size_is_one_chunk() {
        let plan = ChunkPlan::for_plaintext(1023, 1024).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.spans()[0].range, 0..1023);
    }

    #[test]
    fn test_one_byte_over_chunk_size_is_two_chunks() {
        let plan = ChunkPlan::for_plaintext(1025, 1024).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.spans()[1].index, 1);
        assert_eq!(plan.spans()[1].range, 1024..1025);
        assert_eq!(plan.spans()[1].len(), 1);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_chunk() {
        let plan = ChunkPlan::for_plaintext(2048, 1024).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.spans().iter().all(|s| s.len() == 1024));
    }

    #[test]
    fn test_empty_plaintext_is_one_empty_chunk() {
        let plan = ChunkPlan::for_plaintext(0, 1024).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.spans()[0].is_empty());
    }

    #[test]
    fn test_ciphertext_stride_includes_tag() {
        // 3 chunks sealed from 2048 + 500 plaintext bytes
        let blob_len = 2 * (1024 + TAG_SIZE) + 500 + TAG_SIZE;
        let plan = ChunkPlan::for_ciphertext(blob_len, 1024).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.spans()[0].range, 0..1040);
        assert_eq!(plan.spans()[1].range, 1040..2080);
        assert_eq!(plan.spans()[2].len(), 516);
    }

    #[test]
    fn test_empty_ciphertext_has_no_chunks() {
        let plan = ChunkPlan::for_ciphertext(0, 1024).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_windows_carry_global_indices() {
        let plan = ChunkPlan::plaintext_window(6, 2500, 1000).unwrap();
        let indices: Vec<u32> = plan.spans().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![6, 7, 8]);
        assert_eq!(plan.spans()[0].range, 0..1000);
        assert_eq!(plan.spans()[2].range, 2000..2500);

        let ct = ChunkPlan::ciphertext_window(2, 2 * (1000 + TAG_SIZE), 1000).unwrap();
        assert_eq!(ct.spans()[1].index, 3);
        assert_eq!(ct.spans()[1].range, 1016..2032);

        assert!(ChunkPlan::plaintext_window(4, 0, 1000).unwrap().is_empty());
    }

    #[test]
    fn test_window_past_chunk_counter_rejected() {
        let last = u64::from(u32::MAX);
        assert!(ChunkPlan::plaintext_window(last, 10, 10).is_ok());
        assert!(ChunkPlan::plaintext_window(last, 11, 10).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ChunkPlan::for_plaintext(10, 0).is_err());
        assert!(ChunkPlan::for_ciphertext(10, 0).is_err());
    }

    #[test]
    fn test_spans_cover_buffer_in_order() {
        let plan = ChunkPlan::for_plaintext(10_000, 777).unwrap();
        let mut next = 0;
        for (i, span) in plan.spans().iter().enumerate() {
            assert_eq!(span.index as usize, i);
            assert_eq!(span.range.start, next);
            next = span.range.end;
        }
        assert_eq!(next, 10_000);
    }
}
