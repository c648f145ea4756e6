//! BER encoder for ASN.1 structures

use crate::ber::types::{BerLength, BerTag};
use dlms_core::{DlmsError, DlmsResult};

/// BER encoder for ASN.1 structures
///
/// Constructed values are built bottom-up: encode the children into their
/// own encoder first, then wrap the bytes with [`BerEncoder::encode_tlv`].
#[derive(Debug, Default, Clone)]
pub struct BerEncoder {
    buffer: Vec<u8>,
}

impl BerEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a TLV (Tag-Length-Value) triplet
    pub fn encode_tlv(&mut self, tag: &BerTag, value: &[u8]) {
        self.buffer.extend_from_slice(&tag.encode());
        self.buffer.extend_from_slice(&BerLength::new(value.len()).encode());
        self.buffer.extend_from_slice(value);
    }

    /// Encode an INTEGER in minimal two's complement form
    pub fn encode_integer(&mut self, value: i64) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        // drop redundant sign octets
        while start < bytes.len() - 1 {
            let (current, next) = (bytes[start], bytes[start + 1]);
            if (current == 0x00 && next & 0x80 == 0) || (current == 0xFF && next & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        self.encode_tlv(&BerTag::INTEGER, &bytes[start..]);
    }

    pub fn encode_octet_string(&mut self, value: &[u8]) {
        self.encode_tlv(&BerTag::OCTET_STRING, value);
    }

    /// Encode a BIT STRING with `unused_bits` padding bits in the last octet
    pub fn encode_bit_string(&mut self, value: &[u8], unused_bits: u8) -> DlmsResult<()> {
        if unused_bits > 7 || (value.is_empty() && unused_bits != 0) {
            return Err(DlmsError::Asn1Encoding(format!("Invalid unused bit count {}", unused_bits)));
        }
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.push(unused_bits);
        bytes.extend_from_slice(value);
        self.encode_tlv(&BerTag::BIT_STRING, &bytes);
        Ok(())
    }

    /// Encode an OBJECT IDENTIFIER
    pub fn encode_object_identifier(&mut self, oid: &[u32]) -> DlmsResult<()> {
        let tag = BerTag::OBJECT_IDENTIFIER;
        let value = object_identifier_contents(oid)?;
        self.encode_tlv(&tag, &value);
        Ok(())
    }

    pub fn encode_context_specific(&mut self, tag_number: u32, value: &[u8], constructed: bool) {
        self.encode_tlv(&BerTag::context_specific(constructed, tag_number), value);
    }

    pub fn encode_application(&mut self, tag_number: u32, value: &[u8], constructed: bool) {
        self.encode_tlv(&BerTag::application(constructed, tag_number), value);
    }

    /// Append already encoded TLVs
    pub fn append(&mut self, encoded: &[u8]) {
        self.buffer.extend_from_slice(encoded);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Contents octets of an OBJECT IDENTIFIER without tag and length
///
/// Implicitly tagged OIDs (such as the ACSE mechanism-name) carry these
/// contents under a context-specific tag.
pub fn object_identifier_contents(oid: &[u32]) -> DlmsResult<Vec<u8>> {
    if oid.len() < 2 || oid[0] > 2 || (oid[0] < 2 && oid[1] >= 40) {
        return Err(DlmsError::Asn1Encoding(format!("Invalid object identifier {:?}", oid)));
    }
    let mut bytes = Vec::with_capacity(oid.len() + 2);
    let first = oid[0] * 40 + oid[1];
    for &component in std::iter::once(&first).chain(&oid[2..]) {
        let mut groups = vec![(component & 0x7F) as u8];
        let mut remaining = component >> 7;
        while remaining > 0 {
            groups.push(0x80 | (remaining & 0x7F) as u8);
            remaining >>= 7;
        }
        bytes.extend(groups.iter().rev());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_integer_minimal() {
        let cases: [(i64, &[u8]); 6] = [
            (0, &[0x02, 0x01, 0x00]),
            (127, &[0x02, 0x01, 0x7F]),
            (128, &[0x02, 0x02, 0x00, 0x80]),
            (256, &[0x02, 0x02, 0x01, 0x00]),
            (-1, &[0x02, 0x01, 0xFF]),
            (-129, &[0x02, 0x02, 0xFF, 0x7F]),
        ];
        for (value, expected) in cases {
            let mut encoder = BerEncoder::new();
            encoder.encode_integer(value);
            assert_eq!(encoder.as_bytes(), expected, "value {}", value);
        }
    }

    #[test]
    fn test_encode_dlms_context_oid() {
        let mut encoder = BerEncoder::new();
        encoder.encode_object_identifier(&[2, 16, 756, 5, 8, 1, 1]).unwrap();
        assert_eq!(
            encoder.into_bytes(),
            vec![0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01]
        );
        assert!(object_identifier_contents(&[1]).is_err());
        assert!(object_identifier_contents(&[3, 1]).is_err());
    }

    #[test]
    fn test_encode_bit_string() {
        let mut encoder = BerEncoder::new();
        encoder.encode_bit_string(&[0x80], 7).unwrap();
        assert_eq!(encoder.as_bytes(), &[0x03, 0x02, 0x07, 0x80]);
        assert!(encoder.encode_bit_string(&[0x80], 8).is_err());
    }

    #[test]
    fn test_nested_long_form() {
        let mut inner = BerEncoder::new();
        inner.encode_octet_string(&[0xAA; 200]);
        let mut outer = BerEncoder::new();
        outer.encode_context_specific(30, inner.as_bytes(), true);
        let bytes = outer.into_bytes();
        assert_eq!(&bytes[..6], &[0xBE, 0x81, 0xCB, 0x04, 0x81, 0xC8]);
        assert_eq!(bytes.len(), 3 + 3 + 200);
    }
}
