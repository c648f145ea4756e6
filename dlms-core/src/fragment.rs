//! Bounded-size chunking of byte buffers
//!
//! Used by HDLC segmentation and by block transfer of large application
//! PDUs. A [`Fragment`] borrows the buffer and yields consecutive slices of
//! at most `max_chunk_size` bytes. It can be rewound with [`Fragment::reset`].

use crate::error::{DlmsError, DlmsResult};

/// Lazy, restartable chunk sequence over a borrowed buffer
#[derive(Debug, Clone)]
pub struct Fragment<'a> {
    buffer: &'a [u8],
    max_chunk_size: usize,
    position: usize,
}

impl<'a> Fragment<'a> {
    /// Create a new fragment sequence
    ///
    /// # Errors
    /// Returns `InvalidData` if `max_chunk_size` is zero.
    pub fn new(buffer: &'a [u8], max_chunk_size: usize) -> DlmsResult<Self> {
        if max_chunk_size == 0 {
            return Err(DlmsError::InvalidData(
                "Fragment chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            buffer,
            max_chunk_size,
            position: 0,
        })
    }

    /// Number of chunks this buffer splits into
    ///
    /// An empty buffer has zero chunks.
    pub fn chunk_count(&self) -> usize {
        self.buffer.len().div_ceil(self.max_chunk_size)
    }

    pub fn has_next(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Returns the next chunk, or `NoSuchElement` when exhausted
    pub fn next_chunk(&mut self) -> DlmsResult<&'a [u8]> {
        if !self.has_next() {
            return Err(DlmsError::NoSuchElement);
        }
        let end = (self.position + self.max_chunk_size).min(self.buffer.len());
        let chunk = &self.buffer[self.position..end];
        self.position = end;
        Ok(chunk)
    }

    /// True if the chunk most recently returned was the final one
    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// Rewind to the first chunk
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl<'a> Iterator for Fragment<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.buffer.len() - self.position).div_ceil(self.max_chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Fragment<'_> {}
