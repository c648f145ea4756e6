//! Segmentation of long information fields

use bytes::BytesMut;
use dlms_core::{DlmsError, DlmsResult, Fragment};

/// One information field of a segmented transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub data: &'a [u8],
    /// Set on every segment except the last
    pub segmented: bool,
}

/// Split `payload` into information fields of at most `max_information_length` bytes
///
/// An empty payload yields a single empty segment.
pub fn segments(payload: &[u8], max_information_length: usize) -> DlmsResult<Vec<Segment<'_>>> {
    let mut fragment = Fragment::new(payload, max_information_length)?;
    if !fragment.has_next() {
        return Ok(vec![Segment {
            data: payload,
            segmented: false,
        }]);
    }
    let mut out = Vec::with_capacity(fragment.chunk_count());
    while fragment.has_next() {
        let data = fragment.next_chunk()?;
        out.push(Segment {
            data,
            segmented: fragment.has_next(),
        });
    }
    Ok(out)
}

/// Concatenates received segments until the final one
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    limit: usize,
}

impl Reassembler {
    /// `limit` bounds the size of a reassembled message
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
        }
    }

    /// Add a segment; returns the complete message once `segmented` is false
    pub fn push(&mut self, data: &[u8], segmented: bool) -> DlmsResult<Option<Vec<u8>>> {
        if self.buffer.len() + data.len() > self.limit {
            let size = self.buffer.len() + data.len();
            self.buffer.clear();
            return Err(DlmsError::PayloadTooLarge {
                size,
                max: self.limit,
            });
        }
        self.buffer.extend_from_slice(data);
        if segmented {
            Ok(None)
        } else {
            Ok(Some(self.buffer.split().to_vec()))
        }
    }

    pub fn is_active(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count_and_flags() {
        let payload: Vec<u8> = (0..=255).cycle().take(300).collect();
        let parts = segments(&payload, 128).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].segmented && parts[1].segmented);
        assert!(!parts[2].segmented);
        assert_eq!(parts[2].data.len(), 44);
    }

    #[test]
    fn test_reassemble_restores_payload() {
        let payload: Vec<u8> = (0..1000u16).map(|v| (v % 251) as u8).collect();
        for max in [1usize, 7, 128, 999, 1000, 4096] {
            let parts = segments(&payload, max).unwrap();
            assert_eq!(parts.len(), payload.len().div_ceil(max));
            let mut reassembler = Reassembler::new(usize::MAX);
            let mut complete = None;
            for part in &parts {
                complete = reassembler.push(part.data, part.segmented).unwrap();
            }
            assert_eq!(complete.unwrap(), payload);
            assert!(!reassembler.is_active());
        }
    }

    #[test]
    fn test_reassembly_limit() {
        let mut reassembler = Reassembler::new(4);
        assert!(reassembler.push(&[1, 2, 3], true).unwrap().is_none());
        assert!(matches!(
            reassembler.push(&[4, 5], false),
            Err(DlmsError::PayloadTooLarge { size: 5, max: 4 })
        ));
        assert!(!reassembler.is_active());
    }

    #[test]
    fn test_empty_payload_single_segment() {
        let parts = segments(&[], 16).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].segmented);
    }
}
