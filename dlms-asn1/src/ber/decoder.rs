//! BER decoder for ASN.1 structures

use crate::ber::types::{BerLength, BerTag};
use dlms_core::{DlmsError, DlmsResult};

/// BER decoder over a borrowed buffer
///
/// A declared length running past the end of the buffer is a
/// `LengthMismatch`: the framing layer handed over fewer bytes than the
/// PDU claims to contain.
#[derive(Debug, Clone)]
pub struct BerDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BerDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Tag of the next TLV without consuming it
    pub fn peek_tag(&self) -> DlmsResult<BerTag> {
        BerTag::decode(&self.buffer[self.position..]).map(|(tag, _)| tag)
    }

    /// Decode the next TLV, returning its tag and contents
    pub fn decode_tlv(&mut self) -> DlmsResult<(BerTag, &'a [u8])> {
        let rest = &self.buffer[self.position..];
        let (tag, tag_len) = BerTag::decode(rest)?;
        let (length, length_len) = BerLength::decode(&rest[tag_len..])?;
        let start = tag_len + length_len;
        let available = rest.len() - start;
        if length.value() > available {
            return Err(DlmsError::LengthMismatch {
                declared: length.value(),
                actual: available,
            });
        }
        self.position += start + length.value();
        Ok((tag, &rest[start..start + length.value()]))
    }

    /// Decode the next TLV and check it carries `expected`
    pub fn decode_expected(&mut self, expected: BerTag) -> DlmsResult<&'a [u8]> {
        let (tag, value) = self.decode_tlv()?;
        if tag != expected {
            return Err(DlmsError::Asn1Decoding(format!("Expected {:?}, got {:?}", expected, tag)));
        }
        Ok(value)
    }

    pub fn decode_integer(&mut self) -> DlmsResult<i64> {
        let value = self.decode_expected(BerTag::INTEGER)?;
        integer_from_contents(value)
    }

    pub fn decode_octet_string(&mut self) -> DlmsResult<&'a [u8]> {
        self.decode_expected(BerTag::OCTET_STRING)
    }

    /// Decode a BIT STRING, returning the octets and the unused bit count
    pub fn decode_bit_string(&mut self) -> DlmsResult<(&'a [u8], u8)> {
        let value = self.decode_expected(BerTag::BIT_STRING)?;
        bit_string_from_contents(value)
    }

    pub fn decode_object_identifier(&mut self) -> DlmsResult<Vec<u32>> {
        let value = self.decode_expected(BerTag::OBJECT_IDENTIFIER)?;
        object_identifier_from_contents(value)
    }

    pub fn decode_context_specific(&mut self, tag_number: u32, constructed: bool) -> DlmsResult<&'a [u8]> {
        self.decode_expected(BerTag::context_specific(constructed, tag_number))
    }

    pub fn decode_application(&mut self, tag_number: u32, constructed: bool) -> DlmsResult<&'a [u8]> {
        self.decode_expected(BerTag::application(constructed, tag_number))
    }

    /// Skip the next TLV, returning the number of octets skipped
    pub fn skip_tlv(&mut self) -> DlmsResult<usize> {
        let start = self.position;
        self.decode_tlv()?;
        Ok(self.position - start)
    }

    /// Fail if anything follows the last decoded TLV
    pub fn finish(&self) -> DlmsResult<()> {
        if self.has_remaining() {
            return Err(DlmsError::LengthMismatch {
                declared: self.position,
                actual: self.buffer.len(),
            });
        }
        Ok(())
    }
}

pub fn integer_from_contents(value: &[u8]) -> DlmsResult<i64> {
    if value.is_empty() || value.len() > 8 {
        return Err(DlmsError::Asn1Decoding(format!("Invalid INTEGER length {}", value.len())));
    }
    let sign = if value[0] & 0x80 != 0 { -1i64 } else { 0 };
    Ok(value.iter().fold(sign, |acc, b| (acc << 8) | *b as i64))
}

pub fn bit_string_from_contents(value: &[u8]) -> DlmsResult<(&[u8], u8)> {
    let (&unused, bits) = value
        .split_first()
        .ok_or_else(|| DlmsError::Asn1Decoding("Empty BIT STRING".to_string()))?;
    if unused > 7 || (bits.is_empty() && unused != 0) {
        return Err(DlmsError::Asn1Decoding(format!("Invalid unused bit count {}", unused)));
    }
    Ok((bits, unused))
}

pub fn object_identifier_from_contents(value: &[u8]) -> DlmsResult<Vec<u32>> {
    let mut components = Vec::new();
    let mut current: u32 = 0;
    let mut pending = false;
    for &byte in value {
        current = current
            .checked_mul(128)
            .map(|c| c | (byte & 0x7F) as u32)
            .ok_or_else(|| DlmsError::Asn1Decoding("OID component overflow".to_string()))?;
        pending = byte & 0x80 != 0;
        if !pending {
            if components.is_empty() {
                let first = (current / 40).min(2);
                components.push(first);
                components.push(current - first * 40);
            } else {
                components.push(current);
            }
            current = 0;
        }
    }
    if pending || components.is_empty() {
        return Err(DlmsError::Asn1Decoding("Truncated object identifier".to_string()));
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::BerEncoder;

    #[test]
    fn test_decode_sequence_of_values() {
        let mut encoder = BerEncoder::new();
        encoder.encode_integer(-129);
        encoder.encode_octet_string(b"abc");
        encoder.encode_object_identifier(&[2, 16, 756, 5, 8, 2, 5]).unwrap();
        let bytes = encoder.into_bytes();

        let mut decoder = BerDecoder::new(&bytes);
        assert_eq!(decoder.decode_integer().unwrap(), -129);
        assert_eq!(decoder.decode_octet_string().unwrap(), b"abc");
        assert_eq!(decoder.decode_object_identifier().unwrap(), vec![2, 16, 756, 5, 8, 2, 5]);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_declared_length_past_end() {
        let mut decoder = BerDecoder::new(&[0x04, 0x05, 0x01, 0x02]);
        assert!(matches!(
            decoder.decode_tlv(),
            Err(DlmsError::LengthMismatch { declared: 5, actual: 2 })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut decoder = BerDecoder::new(&[0x02, 0x01, 0x00, 0xFF]);
        decoder.decode_integer().unwrap();
        assert!(matches!(decoder.finish(), Err(DlmsError::LengthMismatch { .. })));
    }

    #[test]
    fn test_wrong_tag() {
        let mut decoder = BerDecoder::new(&[0x04, 0x01, 0x00]);
        assert!(matches!(decoder.decode_integer(), Err(DlmsError::Asn1Decoding(_))));
    }

    #[test]
    fn test_peek_and_skip() {
        let mut decoder = BerDecoder::new(&[0xA1, 0x02, 0x05, 0x00, 0x02, 0x01, 0x07]);
        assert_eq!(decoder.peek_tag().unwrap(), BerTag::context_specific(true, 1));
        assert_eq!(decoder.skip_tlv().unwrap(), 4);
        assert_eq!(decoder.decode_integer().unwrap(), 7);
    }

    #[test]
    fn test_truncated_oid() {
        assert!(object_identifier_from_contents(&[0x60, 0x85]).is_err());
        assert_eq!(object_identifier_from_contents(&[0x2B, 0x06]).unwrap(), vec![1, 3, 6]);
    }
}
