//! A-XDR encoder for DLMS/COSEM

use super::encode_length;

/// A-XDR encoder for the fixed-layout xDLMS PDUs
#[derive(Debug, Default, Clone)]
pub struct AxdrEncoder {
    buffer: Vec<u8>,
}

impl AxdrEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn encode_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn encode_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn encode_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn encode_bool(&mut self, value: bool) -> &mut Self {
        self.encode_u8(value as u8)
    }

    /// Presence octet of an OPTIONAL or DEFAULT component
    pub fn encode_presence(&mut self, present: bool) -> &mut Self {
        self.encode_u8(present as u8)
    }

    /// Length-prefixed OCTET STRING
    pub fn encode_octet_string(&mut self, value: &[u8]) -> &mut Self {
        encode_length(value.len(), &mut self.buffer);
        self.buffer.extend_from_slice(value);
        self
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_primitives() {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(0x01).encode_presence(false).encode_u16(0x04B0).encode_u32(1);
        assert_eq!(encoder.as_bytes(), &[0x01, 0x00, 0x04, 0xB0, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_encode_octet_string_lengths() {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_octet_string(&[0xAA; 3]);
        assert_eq!(encoder.as_bytes(), &[0x03, 0xAA, 0xAA, 0xAA]);

        let mut encoder = AxdrEncoder::new();
        encoder.encode_octet_string(&[0u8; 200]);
        assert_eq!(&encoder.as_bytes()[..2], &[0x81, 0xC8]);
        assert_eq!(encoder.into_bytes().len(), 202);
    }
}
